pub mod direction;
pub mod error;
pub mod ids;
pub mod path;
pub mod time;
pub mod tree;
pub mod value;

pub use direction::Direction;
pub use error::CoreError;
pub use ids::ObjectId;
pub use path::{IntoPath, Path};
pub use value::{PropertyTree, Value};
