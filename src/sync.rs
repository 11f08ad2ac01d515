use crate::attribute::{AttributeHandle, Propagation, Registration};
use crate::behavior::BehaviorRegistry;
use crate::debug;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::Result;
use crate::history::{History, HistoryConfig};
use crate::object::Object;
use crate::protocol::{Command, ComponentInfo, ObjectDescriptor, ObjectId};
use crate::registry::{LoadReport, Registry};
use crate::serialization::WireFormat;
use crate::transport::SyncChannel;
use crate::value::Value;
use bytes::Bytes;
use std::time::Duration;
use tracing::{trace, warn};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub format: WireFormat,
    pub history: HistoryConfig,
    /// Upper bound on inbound frames applied per `poll`; `None` drains everything.
    pub drain_budget: Option<usize>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            format: WireFormat::Json,
            history: HistoryConfig::default(),
            drain_budget: None,
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format(mut self, format: WireFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_history_coalescing(mut self, window: Duration) -> Self {
        self.history.coalesce_window = Some(window);
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history.capacity = Some(capacity);
        self
    }

    pub fn with_drain_budget(mut self, budget: usize) -> Self {
        self.drain_budget = Some(budget);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub sent: u64,
    pub send_failures: u64,
    pub receive_failures: u64,
    pub received: u64,
    pub applied: u64,
    pub ignored: u64,
    pub dropped_decode: u64,
    pub dropped_not_found: u64,
    pub dropped_type_mismatch: u64,
    pub skipped_parts: u64,
}

impl SyncStats {
    pub fn dropped(&self) -> u64 {
        self.dropped_decode + self.dropped_not_found + self.dropped_type_mismatch
    }
}

/// The explicit state every core operation runs against: where outbound
/// commands go and where environment-wide history is journaled.
pub struct SyncContext<'a> {
    channel: &'a mut dyn SyncChannel,
    pub(crate) environment: &'a mut History,
    pub(crate) stats: &'a mut SyncStats,
}

impl<'a> SyncContext<'a> {
    pub fn new(
        channel: &'a mut dyn SyncChannel,
        environment: &'a mut History,
        stats: &'a mut SyncStats,
    ) -> Self {
        Self {
            channel,
            environment,
            stats,
        }
    }

    /// Sends a command without waiting. Transport failures are counted and
    /// logged; retrying is the transport's business.
    pub fn emit(&mut self, command: Command) {
        debug::log_command("Outbound", &command);

        match self.channel.send(&command) {
            Ok(()) => {
                self.stats.sent += 1;
                trace!(command = command.name(), object = ?command.object_id(), "sent");
            }
            Err(e) => {
                self.stats.send_failures += 1;
                warn!(command = command.name(), error = %e, "failed to send command");
            }
        }
    }
}

/// Owns the synchronisation core for one editor session: the registry, the
/// channel to the server, the environment journal and the inbound queue.
pub struct SyncManager<C: SyncChannel> {
    channel: C,
    config: SyncConfig,
    registry: Registry,
    behaviors: BehaviorRegistry,
    environment: History,
    dispatcher: Dispatcher,
    stats: SyncStats,
}

impl<C: SyncChannel> SyncManager<C> {
    pub fn new(channel: C, config: SyncConfig) -> Self {
        Self {
            channel,
            registry: Registry::new(config.history),
            behaviors: BehaviorRegistry::new(),
            environment: History::new(config.history),
            dispatcher: Dispatcher::new(config.format),
            stats: SyncStats::default(),
            config,
        }
    }

    pub fn with_behaviors(mut self, behaviors: BehaviorRegistry) -> Self {
        self.behaviors = behaviors;
        self
    }

    pub fn register(&mut self, id: &str, registration: Registration) -> Result<AttributeHandle> {
        let mut ctx = SyncContext::new(&mut self.channel, &mut self.environment, &mut self.stats);
        self.registry.register(id, registration, &mut ctx)
    }

    /// `outbound` is true for edits made in this editor and false for values
    /// that came from the server.
    pub fn set(&mut self, handle: &AttributeHandle, value: Value, outbound: bool) -> Result<()> {
        let mut ctx = SyncContext::new(&mut self.channel, &mut self.environment, &mut self.stats);
        self.registry
            .set(handle, value, Propagation::from_outbound(outbound), &mut ctx)
    }

    pub fn get(&self, handle: &AttributeHandle) -> Result<Value> {
        self.registry.get(handle).cloned()
    }

    pub fn commit(&mut self, handle: &AttributeHandle) -> Result<bool> {
        let mut ctx = SyncContext::new(&mut self.channel, &mut self.environment, &mut self.stats);
        self.registry
            .lookup_mut(&handle.object_id)?
            .commit(&handle.name, &mut ctx)
    }

    pub fn construct_from_descriptor(&mut self, descriptor: ObjectDescriptor) -> LoadReport {
        debug::log_descriptor("Loading", &descriptor);
        let mut ctx = SyncContext::new(&mut self.channel, &mut self.environment, &mut self.stats);
        let report = self
            .registry
            .construct_from_descriptor(descriptor, &self.behaviors, &mut ctx);
        self.stats.skipped_parts += report.skipped.len() as u64;
        report
    }

    /// Loads a saved graph. Every descriptor is attempted; one bad object
    /// does not stop the rest.
    pub fn load_graph(&mut self, descriptors: Vec<ObjectDescriptor>) -> Vec<LoadReport> {
        descriptors
            .into_iter()
            .map(|d| self.construct_from_descriptor(d))
            .collect()
    }

    pub fn construct_local(&mut self, object_type: &str, initial: Vec<Registration>) -> Result<ObjectId> {
        Ok(self.construct_local_with(object_type, initial, Vec::new())?.id)
    }

    /// Places a new object with behavior units bound before it is announced.
    pub fn construct_local_with(
        &mut self,
        object_type: &str,
        initial: Vec<Registration>,
        components: Vec<ComponentInfo>,
    ) -> Result<LoadReport> {
        let mut ctx = SyncContext::new(&mut self.channel, &mut self.environment, &mut self.stats);
        let report = self
            .registry
            .construct_local(object_type, initial, components, &self.behaviors, &mut ctx)?;
        self.stats.skipped_parts += report.skipped.len() as u64;
        Ok(report)
    }

    /// Deletes an object at the user's request and tells the server.
    pub fn destroy(&mut self, id: &str) -> Result<()> {
        let mut ctx = SyncContext::new(&mut self.channel, &mut self.environment, &mut self.stats);
        self.registry.destroy(id, true, &mut ctx)
    }

    pub fn undo(&mut self, id: &str) -> Result<bool> {
        let mut ctx = SyncContext::new(&mut self.channel, &mut self.environment, &mut self.stats);
        self.registry.lookup_mut(id)?.undo(&mut ctx)
    }

    pub fn redo(&mut self, id: &str) -> Result<bool> {
        let mut ctx = SyncContext::new(&mut self.channel, &mut self.environment, &mut self.stats);
        self.registry.lookup_mut(id)?.redo(&mut ctx)
    }

    pub fn undo_environment(&mut self) -> Result<bool> {
        let Some(record) = self.environment.undo() else {
            return Ok(false);
        };
        let handle = AttributeHandle::new(record.object_id, record.attribute);
        let mut ctx = SyncContext::new(&mut self.channel, &mut self.environment, &mut self.stats);
        self.registry
            .set(&handle, record.old, Propagation::Replay, &mut ctx)?;
        Ok(true)
    }

    pub fn redo_environment(&mut self) -> Result<bool> {
        let Some(record) = self.environment.redo() else {
            return Ok(false);
        };
        let handle = AttributeHandle::new(record.object_id, record.attribute);
        let mut ctx = SyncContext::new(&mut self.channel, &mut self.environment, &mut self.stats);
        self.registry
            .set(&handle, record.new, Propagation::Replay, &mut ctx)?;
        Ok(true)
    }

    /// Decodes and applies one inbound frame immediately.
    pub fn on_message(&mut self, raw: &[u8]) -> DispatchOutcome {
        let mut ctx = SyncContext::new(&mut self.channel, &mut self.environment, &mut self.stats);
        self.dispatcher
            .on_message(raw, &mut self.registry, &self.behaviors, &mut ctx)
    }

    /// Buffers an inbound frame to be applied on the next `poll`.
    pub fn enqueue(&mut self, frame: Bytes) {
        self.dispatcher.enqueue(frame);
    }

    /// Pulls everything the channel has received into the inbound queue, then
    /// applies queued frames in arrival order. A failing channel is logged and
    /// counted; frames already queued are still applied.
    pub fn poll(&mut self) -> Vec<DispatchOutcome> {
        while self.channel.is_connected() {
            match self.channel.receive() {
                Ok(Some(frame)) => self.dispatcher.enqueue(frame),
                Ok(None) => break,
                Err(e) => {
                    self.stats.receive_failures += 1;
                    warn!(error = %e, "failed to receive from channel");
                    break;
                }
            }
        }

        let outcomes = self.process_inbound();
        debug::trace_stats(&self.stats);
        outcomes
    }

    pub fn process_inbound(&mut self) -> Vec<DispatchOutcome> {
        let mut ctx = SyncContext::new(&mut self.channel, &mut self.environment, &mut self.stats);
        self.dispatcher.drain(
            &mut self.registry,
            &self.behaviors,
            &mut ctx,
            self.config.drain_budget,
        )
    }

    pub fn object(&self, id: &str) -> Result<&Object> {
        self.registry.lookup(id)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn behaviors_mut(&mut self) -> &mut BehaviorRegistry {
        &mut self.behaviors
    }

    pub fn environment_history(&self) -> &History {
        &self.environment
    }

    pub fn pending_inbound(&self) -> usize {
        self.dispatcher.pending()
    }

    pub fn get_stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub fn close(&mut self) -> Result<()> {
        self.channel.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryScope;
    use crate::transport::MemoryChannel;
    use crate::value::ValueType;

    fn manager() -> SyncManager<MemoryChannel> {
        SyncManager::new(MemoryChannel::new(WireFormat::Json), SyncConfig::new())
    }

    #[test]
    fn test_environment_undo_redo() {
        let mut manager = manager();
        let id = manager.construct_local("SimpleNode", Vec::new()).unwrap();
        let pos = manager
            .register(
                &id,
                Registration::new("transform/pos", ValueType::Vector3).history(HistoryScope::EnvironmentGlobal),
            )
            .unwrap();

        manager.set(&pos, Value::Vector3(5.0, 0.0, 0.0), true).unwrap();
        assert_eq!(manager.environment_history().len(), 1);
        assert!(manager.object(&id).unwrap().history().is_empty());

        assert!(manager.undo_environment().unwrap());
        assert_eq!(manager.get(&pos).unwrap(), Value::Vector3(0.0, 0.0, 0.0));
        assert!(manager.redo_environment().unwrap());
        assert_eq!(manager.get(&pos).unwrap(), Value::Vector3(5.0, 0.0, 0.0));
        assert!(!manager.redo_environment().unwrap());

        assert_eq!(manager.environment_history().len(), 1);
    }

    #[test]
    fn test_send_failure_is_counted_not_fatal() {
        let mut manager = manager();
        let id = manager
            .construct_local("SimpleNode", vec![Registration::new("speed", ValueType::Number)])
            .unwrap();
        manager.channel_mut().close().unwrap();

        let handle = AttributeHandle::new(id, "speed");
        manager.set(&handle, Value::Number(1.0), true).unwrap();

        assert_eq!(manager.get(&handle).unwrap(), Value::Number(1.0));
        assert_eq!(manager.get_stats().send_failures, 1);
    }

    /// Reports itself connected but fails every receive.
    struct BrokenChannel;

    impl SyncChannel for BrokenChannel {
        fn send(&mut self, _command: &Command) -> Result<()> {
            Ok(())
        }

        fn receive(&mut self) -> Result<Option<Bytes>> {
            Err(crate::error::SyncError::Transport("reset by peer".to_string()))
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn set_speed(value: f64) -> Bytes {
        let command = Command::set_attribute("n1", "speed", &Value::Number(value));
        Bytes::from(serde_json::to_vec(&command).unwrap())
    }

    fn n1() -> ObjectDescriptor {
        ObjectDescriptor::new("n1", "SimpleNode").with_attribute(crate::protocol::AttributeInfo::new(
            "speed",
            &Value::Number(0.0),
            HistoryScope::ObjectLocal,
        ))
    }

    #[test]
    fn test_poll_drains_queue_after_channel_closes() {
        let mut manager = manager();
        manager.construct_from_descriptor(n1());
        manager.enqueue(set_speed(2.0));
        manager.close().unwrap();

        let outcomes = manager.poll();

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_applied());
        assert_eq!(manager.get(&AttributeHandle::new("n1", "speed")).unwrap(), Value::Number(2.0));
        assert_eq!(manager.get_stats().receive_failures, 0);
    }

    #[test]
    fn test_receive_failure_is_counted_not_fatal() {
        let mut manager = SyncManager::new(BrokenChannel, SyncConfig::new());
        manager.construct_from_descriptor(n1());
        manager.enqueue(set_speed(3.0));

        let outcomes = manager.poll();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(manager.get(&AttributeHandle::new("n1", "speed")).unwrap(), Value::Number(3.0));
        assert_eq!(manager.get_stats().receive_failures, 1);
    }

    #[test]
    fn test_config_builder() {
        let config = SyncConfig::new()
            .with_format(WireFormat::MessagePack)
            .with_history_coalescing(Duration::from_secs(3))
            .with_history_capacity(64)
            .with_drain_budget(16);

        assert_eq!(config.format, WireFormat::MessagePack);
        assert_eq!(config.history.coalesce_window, Some(Duration::from_secs(3)));
        assert_eq!(config.history.capacity, Some(64));
        assert_eq!(config.drain_budget, Some(16));
    }

    #[test]
    fn test_coalesced_edits_undo_together() {
        let mut manager = SyncManager::new(
            MemoryChannel::new(WireFormat::Json),
            SyncConfig::new().with_history_coalescing(Duration::from_secs(3)),
        );
        let id = manager
            .construct_local("SimpleNode", vec![Registration::new("speed", ValueType::Number)])
            .unwrap();
        let handle = AttributeHandle::new(id.clone(), "speed");

        for v in [1.0, 2.0, 3.0] {
            manager.set(&handle, Value::Number(v), true).unwrap();
        }
        assert_eq!(manager.object(&id).unwrap().history().len(), 1);

        assert!(manager.undo(&id).unwrap());
        assert_eq!(manager.get(&handle).unwrap(), Value::Number(0.0));
    }
}
