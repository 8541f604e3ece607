pub mod repo;
pub mod repo_types;

pub use repo::{InsertError, PgUserRepository, UserRepository};
pub use repo_types::{AuthMethod, Credential, Education, Experience, NewUser, Role, User};
