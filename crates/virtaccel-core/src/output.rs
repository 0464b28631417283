//! Output mapper.
//!
//! Turns the engine's per-element diagnostics into read-only channel
//! writes. Only elements registered with the table are mapped. An element
//! the engine produced nothing for gets the configured default value on
//! every one of its channels, so consumers never read stale data as if it
//! were current.

use tracing::debug;
use virtaccel_types::PerElementDiagnostics;

use crate::table::ChannelTable;

/// One pending channel write.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelWrite {
    /// Target channel.
    pub channel: String,
    /// Value to write.
    pub value: f64,
}

/// What one mapping pass produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputReport {
    /// Writes in output-binding registration order.
    pub writes: Vec<ChannelWrite>,
    /// Registered elements with no diagnostic record this cycle.
    pub missing_elements: Vec<String>,
}

impl OutputReport {
    /// Whether every registered element produced a record.
    pub fn is_complete(&self) -> bool {
        self.missing_elements.is_empty()
    }
}

/// Maps diagnostics onto read-only channels.
#[derive(Debug, Clone, Copy)]
pub struct OutputMapper {
    default_error_value: f64,
}

impl OutputMapper {
    /// Create a mapper writing `default_error_value` for absent results.
    pub const fn new(default_error_value: f64) -> Self {
        Self {
            default_error_value,
        }
    }

    /// Compute the writes for one cycle.
    pub fn map(&self, table: &ChannelTable, diagnostics: &PerElementDiagnostics) -> OutputReport {
        let mut report = OutputReport::default();

        for element in table.elements() {
            let record = diagnostics.record_for(element);
            if record.is_none() {
                report.missing_elements.push(element.clone());
            }

            for output in table.outputs().iter().filter(|o| &o.element == element) {
                let value = match record.map(|r| r.get(&output.quantity)) {
                    Some(Some(v)) => v,
                    Some(None) => {
                        debug!(
                            element = %element,
                            quantity = %output.quantity,
                            "Quantity missing from diagnostic record"
                        );
                        self.default_error_value
                    }
                    None => self.default_error_value,
                };
                report.writes.push(ChannelWrite {
                    channel: output.channel.clone(),
                    value,
                });
            }
        }

        report
    }
}
