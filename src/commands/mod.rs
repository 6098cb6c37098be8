pub mod content;
pub mod ops;
pub mod posts;
pub mod render;
pub mod serve;

pub use content::{script, social, topics};
pub use ops::{backup_create, backup_list, backup_restore, health, soak, stats};
pub use posts::{cancel_post, list_posts, schedule_post};
pub use render::render;
pub use serve::serve;
