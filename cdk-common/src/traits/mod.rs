pub mod auth_traits;
pub mod repository_traits;
