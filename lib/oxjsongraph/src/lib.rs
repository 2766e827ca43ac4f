#![doc = include_str!("../README.md")]
#![doc(test(attr(deny(warnings))))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![doc(html_favicon_url = "https://raw.githubusercontent.com/oxigraph/oxigraph/main/logo.svg")]
#![doc(html_logo_url = "https://raw.githubusercontent.com/oxigraph/oxigraph/main/logo.svg")]

mod codec;
mod compare;
mod dates;
mod error;
mod node;
mod parser;
mod pushback;
mod registry;
mod resolver;
mod types;
mod value;
mod vocab;
mod writer;

pub use codec::{CodecRegistry, CustomReader, CustomWriter};
pub use compare::deep_equals;
pub use error::{JsonGraphError, JsonGraphSyntaxError, TextPosition};
pub use node::{JNode, JNodeRef, JValue, UNASSIGNED_ID};
pub use parser::GraphParser;
pub use registry::{FieldMap, TypeRegistry};
pub use resolver::Resolver;
pub use types::{Constructor, FieldDescriptor, Primitive, TypeDescriptor, TypeKind, TypeRef};
pub use value::{
    ArrayRef, ArrayValue, CollectionKind, CollectionRef, CollectionValue, MapKind, MapRef,
    MapValue, ObjectRef, ObjectValue, Value,
};
pub use vocab::{ID, ITEMS, KEYS, REF, TYPE};
pub use writer::{GraphSerializer, JsonEmitter};
