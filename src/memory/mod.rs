pub mod object;
pub mod tree;
pub mod region;
pub mod view;
pub mod mapper;

pub use object::{CommentSlot, Comments, ListingItem, MemoryObject, ObjectType};
pub use region::{MemoryRegion, TypeConversionError};
pub use view::{MemoryView, SystemView};
