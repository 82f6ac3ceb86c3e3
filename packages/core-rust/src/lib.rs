//! Switchboard Core -- message envelope, prefix classification, and JSON frame codec.

pub mod category;
pub mod context;
pub mod message;

pub use category::{classify, ClassifyError, MessageCategory};
pub use context::{AuthContext, MessageContext, TracingContext};
pub use message::{
    now_millis, CodecError, ErrorPayload, Message, ShutdownNotice, INTERNAL_ERROR,
    SYSTEM_SHUTDOWN,
};
