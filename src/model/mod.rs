//! # Scene Graph Model
//!
//! Clean DTOs shared by the store, the scanner, the matcher, the auditor and
//! the healing loop.
//!
//! Design rule: this module is pure data with no I/O and no async.

pub mod node;
pub mod path;
pub mod port;
pub mod value;
pub mod vec3;
pub mod attribute_map;

pub use node::SceneNode;
pub use path::NodePath;
pub use port::{FlowDirection, Port, PortShape, SQ_IN_PER_SQ_FT};
pub use value::{Value, ValueType};
pub use vec3::Vec3;
pub use attribute_map::{Attribute, AttributeMap, PropertyMap};
