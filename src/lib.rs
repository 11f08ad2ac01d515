pub mod attribute;
pub mod behavior;
pub mod debug;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod object;
pub mod protocol;
pub mod registry;
pub mod serialization;
pub mod sync;
pub mod transport;
pub mod value;

pub use attribute::{
    Attribute, AttributeHandle, Propagation, Puller, Registration, Subscriber,
};

pub use behavior::{
    BehaviorFactory, BehaviorRegistry, BehaviorUnit, Binder,
};

pub use dispatcher::{
    DispatchOutcome, Dispatcher,
};

pub use error::{
    Result, SyncError,
};

pub use history::{
    History, HistoryConfig, HistoryRecord, HistoryScope,
};

pub use object::{
    Lifecycle, Object, Provenance,
};

pub use protocol::{
    AttributeInfo, AttributeName, Command, ComponentInfo, ObjectDescriptor, ObjectId, PortInfo,
};

pub use registry::{
    LoadReport, Registry,
};

pub use serialization::{
    CommandCodec, FrameReader, FrameWriter, WireFormat,
};

pub use sync::{
    SyncConfig, SyncContext, SyncManager, SyncStats,
};

pub use transport::{
    MemoryChannel, StdioChannel, StreamChannel, SyncChannel,
};

#[cfg(feature = "async")]
pub use transport::bridge::{
    run_bridge, tokio_channel, BridgeEnds, FrameTransport, TokioChannel,
};

pub use value::{
    Value, ValueType,
};

pub use debug::{
    command_summary, format_bytes, init_debug_mode, is_debug_enabled, is_trace_enabled,
    log_command, log_descriptor, set_debug_mode, trace_receive, trace_stats,
};
