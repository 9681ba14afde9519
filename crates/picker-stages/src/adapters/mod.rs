//! Source adapters

pub mod discourse;
pub mod eodhd;
pub mod file;

pub use discourse::{DiscourseForumAdapter, ForumBody, ForumPost, ForumThread, TitleMatcher};
pub use eodhd::EodhdAdapter;
pub use file::FileAdapter;
