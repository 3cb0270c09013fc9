mod repo;
mod schema;

pub use repo::{DocRepo, DocumentInfo, DocumentStateRow, MemberStatus, SessionInfo, UserInfo};
pub use schema::init_database;
