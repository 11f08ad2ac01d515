use crate::behavior::BehaviorRegistry;
use crate::debug;
use crate::error::{Result, SyncError};
use crate::protocol::{AttributeInfo, Command, ObjectId};
use crate::registry::{LoadReport, Registry};
use crate::serialization::{CommandCodec, WireFormat};
use crate::sync::SyncContext;
use crate::value::Value;
use bytes::Bytes;
use std::collections::VecDeque;
use tracing::{debug, warn};

#[derive(Debug)]
pub enum DispatchOutcome {
    Applied {
        command: &'static str,
        id: ObjectId,
    },
    Loaded(LoadReport),
    /// A command string this side does not know.
    Ignored(String),
    Dropped(SyncError),
}

impl DispatchOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, DispatchOutcome::Applied { .. } | DispatchOutcome::Loaded(_))
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, DispatchOutcome::Dropped(_))
    }

    pub fn error(&self) -> Option<&SyncError> {
        match self {
            DispatchOutcome::Dropped(err) => Some(err),
            _ => None,
        }
    }
}

/// Applies inbound commands to the registry. Everything it applies is
/// inbound state, so nothing it does is ever sent back out.
pub struct Dispatcher {
    codec: CommandCodec,
    queue: VecDeque<Bytes>,
}

impl Dispatcher {
    pub fn new(format: WireFormat) -> Self {
        Self {
            codec: CommandCodec::new(format),
            queue: VecDeque::new(),
        }
    }

    pub fn enqueue(&mut self, frame: Bytes) {
        debug::trace_receive(frame.len(), self.queue.len() + 1);
        self.queue.push_back(frame);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Applies queued frames in arrival order, at most `budget` of them.
    pub fn drain(
        &mut self,
        registry: &mut Registry,
        behaviors: &BehaviorRegistry,
        ctx: &mut SyncContext<'_>,
        budget: Option<usize>,
    ) -> Vec<DispatchOutcome> {
        let limit = budget.unwrap_or(usize::MAX);
        let mut outcomes = Vec::new();

        while outcomes.len() < limit {
            let Some(frame) = self.queue.pop_front() else {
                break;
            };
            outcomes.push(self.on_message(&frame, registry, behaviors, ctx));
        }

        outcomes
    }

    /// Decodes and applies one frame. Never fails: every problem is logged,
    /// counted and reported in the outcome.
    pub fn on_message(
        &mut self,
        raw: &[u8],
        registry: &mut Registry,
        behaviors: &BehaviorRegistry,
        ctx: &mut SyncContext<'_>,
    ) -> DispatchOutcome {
        ctx.stats.received += 1;

        let command = match self.codec.decode(raw) {
            Ok(command) => command,
            Err(err) => {
                ctx.stats.dropped_decode += 1;
                warn!(bytes = raw.len(), error = %err, "dropping undecodable message");
                return DispatchOutcome::Dropped(err);
            }
        };

        debug::log_command("Inbound", &command);

        if command == Command::Unknown {
            let name = self
                .codec
                .command_name(raw)
                .unwrap_or_else(|| "<missing>".to_string());
            ctx.stats.ignored += 1;
            warn!(command = %name, "ignoring unknown command");
            return DispatchOutcome::Ignored(name);
        }

        let name = command.name();
        let id = command.object_id().map(str::to_string);

        match apply(command, registry, behaviors, ctx) {
            Ok(outcome) => {
                ctx.stats.applied += 1;
                debug!(command = name, object = ?id, "applied inbound command");
                outcome
            }
            Err(err) => {
                match &err {
                    SyncError::NotFound(_) => ctx.stats.dropped_not_found += 1,
                    SyncError::TypeMismatch { .. } => ctx.stats.dropped_type_mismatch += 1,
                    SyncError::UnknownComponentType(_) => ctx.stats.skipped_parts += 1,
                    _ => ctx.stats.dropped_decode += 1,
                }
                warn!(command = name, object = ?id, error = %err, "dropping inbound command");
                DispatchOutcome::Dropped(err)
            }
        }
    }
}

fn apply(
    command: Command,
    registry: &mut Registry,
    behaviors: &BehaviorRegistry,
    ctx: &mut SyncContext<'_>,
) -> Result<DispatchOutcome> {
    match command {
        Command::NewObject(descriptor) => {
            let report = registry.construct_from_descriptor(descriptor, behaviors, ctx);
            ctx.stats.skipped_parts += report.skipped.len() as u64;
            Ok(DispatchOutcome::Loaded(report))
        }
        Command::NewAttribute {
            id,
            name,
            value_type,
            history,
            value,
        } => {
            let info = AttributeInfo {
                name,
                value_type,
                value,
                history: Some(history),
            };
            registry.lookup_mut(&id)?.register_info(&info, ctx)?;
            Ok(DispatchOutcome::Applied {
                command: "new attribute",
                id,
            })
        }
        Command::SetAttribute { id, name, value } => {
            let object = registry.lookup_mut(&id)?;
            let value_type = object
                .attribute(&name)
                .ok_or_else(|| SyncError::not_found_attribute(&id, &name))?
                .value_type();
            let value = Value::decode(&value, value_type).map_err(|e| e.for_attribute(&name))?;
            object.set(&name, value, false, ctx)?;
            Ok(DispatchOutcome::Applied {
                command: "set attribute",
                id,
            })
        }
        Command::DeleteObject { id } => {
            registry.destroy(&id, false, ctx)?;
            Ok(DispatchOutcome::Applied {
                command: "delete object",
                id,
            })
        }
        Command::Unknown => Ok(DispatchOutcome::Ignored("unknown".to_string())),
    }
}
