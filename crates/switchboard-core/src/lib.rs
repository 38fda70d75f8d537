//! Core types for the switchboard provider SDK.
//!
//! This crate holds everything both sides of the runner/provider boundary
//! share: the self-describing type system and its data decoder, configuration
//! schemas, the byte/value codec, the provider method contract, and the
//! logging subsystem.

pub mod codec;
pub mod decode;
pub mod error;
pub mod function;
pub mod logging;
pub mod provider;
pub mod schema;
pub mod subscription;
pub mod ty;
pub mod value;

pub use codec::{decode_input, decode_value, encode_output};
pub use decode::{decode_schema, decode_type};
pub use error::{ProviderError, ProviderResult};
pub use function::{invoke_action_evaluation, Action, Function, FunctionRegistry, Trigger};
pub use provider::{GlobalConfig, Provider, ProviderConfig, RunnerProvider, RunnerSnapshot};
pub use schema::{AttrSchema, BlockSchema, ObjectSchema};
pub use subscription::{Subscription, SubscriptionStore};
pub use ty::{PrimitiveType, TypeDescriptor};
pub use value::{DynamicValue, ValueType};
