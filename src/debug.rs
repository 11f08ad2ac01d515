use crate::protocol::{Command, ObjectDescriptor};
use crate::sync::SyncStats;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace};

static DEBUG_MODE: AtomicBool = AtomicBool::new(false);
static TRACE_MODE: AtomicBool = AtomicBool::new(false);

/// Initialize debug mode from environment variables
///
/// - `NODEGRAPH_SYNC_DEBUG=1` or `NODEGRAPH_SYNC_DEBUG_JSON=1`: log every command as pretty JSON
/// - `NODEGRAPH_SYNC_TRACE=1`: log a one-line summary of every frame
pub fn init_debug_mode() {
    let debug = env::var("NODEGRAPH_SYNC_DEBUG").is_ok() || env::var("NODEGRAPH_SYNC_DEBUG_JSON").is_ok();
    let trace = env::var("NODEGRAPH_SYNC_TRACE").is_ok();

    set_debug_mode(debug, trace);

    if debug {
        info!("debug mode enabled, all commands will be logged as JSON");
    }
    if trace {
        info!("trace mode enabled");
    }
}

/// Overrides the environment, mostly for tests and embedding hosts.
pub fn set_debug_mode(debug: bool, trace: bool) {
    DEBUG_MODE.store(debug, Ordering::Relaxed);
    TRACE_MODE.store(trace, Ordering::Relaxed);
}

pub fn is_debug_enabled() -> bool {
    DEBUG_MODE.load(Ordering::Relaxed)
}

pub fn is_trace_enabled() -> bool {
    TRACE_MODE.load(Ordering::Relaxed)
}

/// Log a command in JSON format if debug mode is enabled
pub fn log_command(direction: &str, command: &Command) {
    if is_trace_enabled() {
        trace!(target: "nodegraph_sync::wire", "{} {}", direction, command_summary(command));
    }

    if !is_debug_enabled() {
        return;
    }

    match serde_json::to_string_pretty(command) {
        Ok(json) => debug!(target: "nodegraph_sync::wire", "{} command:\n{}", direction, json),
        Err(e) => debug!(target: "nodegraph_sync::wire", "failed to serialize command to JSON: {}", e),
    }
}

pub fn log_descriptor(label: &str, descriptor: &ObjectDescriptor) {
    if !is_debug_enabled() {
        return;
    }

    match serde_json::to_string_pretty(descriptor) {
        Ok(json) => debug!(
            target: "nodegraph_sync::wire",
            "{} descriptor ({} attributes, {} components):\n{}",
            label,
            descriptor.attributes.len(),
            descriptor.components.len(),
            json
        ),
        Err(e) => debug!(target: "nodegraph_sync::wire", "failed to serialize descriptor to JSON: {}", e),
    }
}

/// Trace a frame arriving in the inbound queue
pub fn trace_receive(bytes: usize, queued: usize) {
    if !is_trace_enabled() {
        return;
    }

    trace!(target: "nodegraph_sync::wire", "← received {} ({} queued)", format_bytes(bytes), queued);
}

pub fn trace_stats(stats: &SyncStats) {
    if !is_trace_enabled() {
        return;
    }

    trace!(
        target: "nodegraph_sync::wire",
        "sent {} (failed {}), received {} (failed {}), applied {}, ignored {}, dropped {}",
        stats.sent,
        stats.send_failures,
        stats.received,
        stats.receive_failures,
        stats.applied,
        stats.ignored,
        stats.dropped()
    );
}

/// Format bytes in human-readable format (KB, MB, etc.)
pub fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// One-line summary of a command
pub fn command_summary(command: &Command) -> String {
    match command {
        Command::NewObject(descriptor) => format!(
            "new object {} ({}, {} attrs, {} comps)",
            descriptor.id,
            descriptor.object_type,
            descriptor.attributes.len(),
            descriptor.components.len()
        ),
        Command::NewAttribute { id, name, value_type, .. } => {
            format!("new attribute {}.{} ({})", id, name, value_type)
        }
        Command::SetAttribute { id, name, value } => format!("set attribute {}.{} = {}", id, name, value),
        Command::DeleteObject { id } => format!("delete object {}", id),
        Command::Unknown => "unknown command".to_string(),
    }
}
