pub mod exit;
pub mod say_to_user;

pub use exit::ExitTool;
pub use say_to_user::SayToUserTool;
