//! Channel declaration table.
//!
//! Built once before the runtime starts and frozen afterwards. It holds:
//!
//! - the record list handed to the bridge process (one record per
//!   channel, in registration order),
//! - the read-write triples (setpoint, setpoint echo, readback) and the
//!   [`FieldBinding`] each one drives,
//! - the read-only [`OutputBinding`]s fed by the output mapper,
//! - the elements whose outputs are mapped each cycle.
//!
//! [`ChannelTable::write_database`] renders the records in the soft-IOC
//! database format:
//!
//! ```text
//! record(ao, "LS1:QH_D1:GRAD_CSET") {
//!     field("DESC", "Quadrupole Gradient Set Point")
//!     field("VAL", 10.0)
//! }
//! ```

use std::collections::HashSet;
use std::io::Write;

use virtaccel_types::{ChannelKind, ChannelMetadata, DriveRange, FieldBinding};

/// Errors raised while declaring channels.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeclareError {
    /// A channel name is registered twice.
    #[error("duplicate channel name: {name}")]
    DuplicateChannel {
        /// The repeated name.
        name: String,
    },

    /// A second read-write triple for a field that already has one.
    #[error("{binding} already has setpoint {setpoint}")]
    DuplicateBinding {
        /// The field bound twice.
        binding: FieldBinding,
        /// Setpoint channel of the existing triple.
        setpoint: String,
    },

    /// A channel name is empty or whitespace.
    #[error("empty channel name for {binding}")]
    EmptyChannelName {
        /// Binding the channel was meant for.
        binding: FieldBinding,
    },

    /// A read-write channel's binding has no initial setting.
    #[error("no initial setting for {binding}")]
    MissingSetting {
        /// The binding without a value.
        binding: FieldBinding,
    },

    /// The channel catalog has no entry for a device field.
    #[error("channel not found: element {element}, field {field}, handle {}", handle.handle())]
    ChannelNotFound {
        /// Element name.
        element: String,
        /// Engineering field name.
        field: String,
        /// Requested channel kind.
        handle: ChannelKind,
    },

    /// The channel catalog is empty.
    #[error("channel catalog is empty")]
    EmptyCatalog,

    /// A catalog channel name does not follow `[PREFIX:]SYSTEM:DEVICE:FIELD`.
    #[error("cannot determine channel prefix from {channel}")]
    ChannelPrefix {
        /// The offending channel name.
        channel: String,
    },
}

/// Record type in the bridge configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// Analog output (writable setpoints and control values).
    Ao,
    /// Analog input (echoes, readbacks, diagnostics, counters).
    Ai,
    /// Binary input (status).
    Bi,
    /// Long string output (serialized beam state).
    Lso,
}

impl RecordType {
    /// Record type keyword.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ao => "ao",
            Self::Ai => "ai",
            Self::Bi => "bi",
            Self::Lso => "lso",
        }
    }
}

/// A record field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Integer, written unquoted.
    Int(i64),
    /// Float, written unquoted.
    Float(f64),
    /// String, written quoted.
    Text(String),
}

/// One record of the bridge configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Record type.
    pub record_type: RecordType,
    /// Channel name.
    pub name: String,
    /// Ordered fields; `None` values are omitted when rendered.
    pub fields: Vec<(&'static str, Option<FieldValue>)>,
}

impl Record {
    /// Look up a field value by name.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .and_then(|(_, v)| v.as_ref())
    }
}

/// A setpoint/echo/readback triple bound to one device field.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadWriteChannels {
    /// Writable setpoint channel.
    pub setpoint: String,
    /// Echo of the confirmed setpoint.
    pub readset: String,
    /// Readback of the applied value.
    pub readback: String,
    /// Device field driven by the setpoint.
    pub binding: FieldBinding,
    /// Resolved drive range, if the setpoint is limited.
    pub drive: Option<DriveRange>,
}

/// Routes one diagnostic quantity of one element to a read-only channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBinding {
    /// Lattice element name.
    pub element: String,
    /// Diagnostic quantity name.
    pub quantity: String,
    /// Read-only channel receiving the value.
    pub channel: String,
}

/// The channel declaration table.
#[derive(Debug, Clone, Default)]
pub struct ChannelTable {
    records: Vec<Record>,
    read_write: Vec<ReadWriteChannels>,
    outputs: Vec<OutputBinding>,
    elements: Vec<String>,
    names: HashSet<String>,
}

impl ChannelTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a read-write triple.
    ///
    /// `initial` seeds the `VAL` of all three records and anchors the
    /// drive limit.
    ///
    /// # Errors
    ///
    /// Returns [`DeclareError`] on an empty or duplicate name, or when
    /// `binding` already backs another triple. Nothing is registered on
    /// error.
    pub fn add_read_write(
        &mut self,
        setpoint: &str,
        readset: &str,
        readback: &str,
        binding: FieldBinding,
        meta: &ChannelMetadata,
        initial: f64,
    ) -> Result<(), DeclareError> {
        self.check_names(&[setpoint, readset, readback], &binding)?;
        if let Some(existing) = self.read_write.iter().find(|rw| rw.binding == binding) {
            return Err(DeclareError::DuplicateBinding {
                binding,
                setpoint: existing.setpoint.clone(),
            });
        }
        let drive = meta.drive.resolve(initial);
        let desc = &meta.description;

        self.push_record(
            RecordType::Ao,
            setpoint,
            vec![
                ("DESC", Some(FieldValue::Text(format!("{desc} Set Point")))),
                ("VAL", Some(FieldValue::Float(initial))),
                ("DRVH", drive.map(|d| FieldValue::Float(d.high))),
                ("DRVL", drive.map(|d| FieldValue::Float(d.low))),
                ("PREC", Some(FieldValue::Int(i64::from(meta.precision)))),
                ("EGU", Some(FieldValue::Text(meta.unit.clone()))),
            ],
        );
        self.push_record(
            RecordType::Ai,
            readset,
            numeric_fields(&format!("{desc} Set Point Read Back"), initial, meta),
        );
        self.push_record(
            RecordType::Ai,
            readback,
            numeric_fields(&format!("{desc} Read Back"), initial, meta),
        );

        self.read_write.push(ReadWriteChannels {
            setpoint: setpoint.to_owned(),
            readset: readset.to_owned(),
            readback: readback.to_owned(),
            binding,
            drive,
        });
        Ok(())
    }

    /// Declare a read-only diagnostic channel for `(element, quantity)`.
    ///
    /// # Errors
    ///
    /// Returns [`DeclareError`] on an empty or duplicate name.
    pub fn add_read_only(
        &mut self,
        readback: &str,
        binding: FieldBinding,
        meta: &ChannelMetadata,
        initial: f64,
    ) -> Result<(), DeclareError> {
        self.check_names(&[readback], &binding)?;
        self.push_record(
            RecordType::Ai,
            readback,
            numeric_fields(&format!("{} Read Back", meta.description), initial, meta),
        );
        self.outputs.push(OutputBinding {
            element: binding.device,
            quantity: binding.field,
            channel: readback.to_owned(),
        });
        Ok(())
    }

    /// Mark an element as one whose outputs are mapped every cycle.
    /// Registering the same element twice has no effect.
    pub fn add_element(&mut self, element: &str) {
        if !self.elements.iter().any(|e| e == element) {
            self.elements.push(element.to_owned());
        }
    }

    /// Append a runtime control record (counter, noise, status, ...).
    ///
    /// # Errors
    ///
    /// Returns [`DeclareError::DuplicateChannel`] if the name is taken.
    pub fn add_control(&mut self, record: Record) -> Result<(), DeclareError> {
        if !self.names.insert(record.name.clone()) {
            return Err(DeclareError::DuplicateChannel { name: record.name });
        }
        self.records.push(record);
        Ok(())
    }

    /// Records in registration order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Read-write triples in registration order.
    pub fn read_write(&self) -> &[ReadWriteChannels] {
        &self.read_write
    }

    /// Read-only output bindings in registration order.
    pub fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    /// Registered output elements in registration order.
    pub fn elements(&self) -> &[String] {
        &self.elements
    }

    /// Whether a channel name is declared.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Render all records in the bridge database format.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from the writer.
    pub fn write_database<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        for record in &self.records {
            write!(
                out,
                "record({}, \"{}\") {{\r\n",
                record.record_type.as_str(),
                record.name
            )?;
            for (name, value) in &record.fields {
                match value {
                    None => {}
                    Some(FieldValue::Int(v)) => write!(out, "    field(\"{name}\", {v})\r\n")?,
                    Some(FieldValue::Float(v)) => write!(out, "    field(\"{name}\", {v:?})\r\n")?,
                    Some(FieldValue::Text(v)) => {
                        write!(out, "    field(\"{name}\", \"{v}\")\r\n")?;
                    }
                }
            }
            write!(out, "}}\r\n\r\n")?;
        }
        Ok(())
    }

    fn check_names(&self, names: &[&str], binding: &FieldBinding) -> Result<(), DeclareError> {
        let mut seen = HashSet::new();
        for name in names {
            if name.trim().is_empty() {
                return Err(DeclareError::EmptyChannelName {
                    binding: binding.clone(),
                });
            }
            if self.names.contains(*name) || !seen.insert(*name) {
                return Err(DeclareError::DuplicateChannel {
                    name: (*name).to_owned(),
                });
            }
        }
        Ok(())
    }

    fn push_record(
        &mut self,
        record_type: RecordType,
        name: &str,
        fields: Vec<(&'static str, Option<FieldValue>)>,
    ) {
        self.names.insert(name.to_owned());
        self.records.push(Record {
            record_type,
            name: name.to_owned(),
            fields,
        });
    }
}

fn numeric_fields(
    desc: &str,
    initial: f64,
    meta: &ChannelMetadata,
) -> Vec<(&'static str, Option<FieldValue>)> {
    vec![
        ("DESC", Some(FieldValue::Text(desc.to_owned()))),
        ("VAL", Some(FieldValue::Float(initial))),
        ("PREC", Some(FieldValue::Int(i64::from(meta.precision)))),
        ("EGU", Some(FieldValue::Text(meta.unit.clone()))),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use virtaccel_types::DriveLimit;

    use super::*;

    fn quad_meta() -> ChannelMetadata {
        ChannelMetadata::new("Quadrupole Gradient", "T/m")
    }

    fn table_with_quad() -> ChannelTable {
        let mut table = ChannelTable::new();
        table
            .add_read_write(
                "Q1:GRAD_CSET",
                "Q1:GRAD_RSET",
                "Q1:GRAD_RD",
                FieldBinding::new("Q1", "gradient"),
                &quad_meta(),
                10.0,
            )
            .unwrap();
        table
    }

    #[test]
    fn read_write_creates_three_records() {
        let table = table_with_quad();
        let types: Vec<_> = table.records().iter().map(|r| r.record_type).collect();
        assert_eq!(types, vec![RecordType::Ao, RecordType::Ai, RecordType::Ai]);
        assert_eq!(table.read_write().len(), 1);
        let rw = table.read_write().first().unwrap();
        assert_eq!(
            (rw.setpoint.as_str(), rw.readset.as_str(), rw.readback.as_str()),
            ("Q1:GRAD_CSET", "Q1:GRAD_RSET", "Q1:GRAD_RD")
        );
        assert!(table.contains("Q1:GRAD_RD"));
        assert!(!table.contains("Q9:GRAD_RD"));
    }

    #[test]
    fn duplicate_names_are_rejected_atomically() {
        let mut table = table_with_quad();
        let err = table
            .add_read_write(
                "Q2:GRAD_CSET",
                "Q2:GRAD_RSET",
                "Q1:GRAD_RD",
                FieldBinding::new("Q2", "gradient"),
                &quad_meta(),
                1.0,
            )
            .unwrap_err();
        assert_eq!(
            err,
            DeclareError::DuplicateChannel {
                name: "Q1:GRAD_RD".to_owned()
            }
        );
        assert_eq!(table.records().len(), 3);
        assert!(!table.contains("Q2:GRAD_CSET"));
    }

    #[test]
    fn second_triple_for_a_field_is_rejected() {
        let mut table = table_with_quad();
        let err = table
            .add_read_write(
                "Q1:GRAD2_CSET",
                "Q1:GRAD2_RSET",
                "Q1:GRAD2_RD",
                FieldBinding::new("Q1", "gradient"),
                &quad_meta(),
                10.0,
            )
            .unwrap_err();
        assert_eq!(
            err,
            DeclareError::DuplicateBinding {
                binding: FieldBinding::new("Q1", "gradient"),
                setpoint: "Q1:GRAD_CSET".to_owned(),
            }
        );
        assert_eq!(table.read_write().len(), 1);
        assert!(!table.contains("Q1:GRAD2_CSET"));
    }

    #[test]
    fn same_name_within_triple_is_rejected() {
        let mut table = ChannelTable::new();
        let err = table
            .add_read_write(
                "Q1:X",
                "Q1:X",
                "Q1:Y",
                FieldBinding::new("Q1", "gradient"),
                &quad_meta(),
                1.0,
            )
            .unwrap_err();
        assert!(matches!(err, DeclareError::DuplicateChannel { .. }));
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut table = ChannelTable::new();
        let err = table
            .add_read_only(
                " ",
                FieldBinding::new("BPM1", "x"),
                &ChannelMetadata::default(),
                0.0,
            )
            .unwrap_err();
        assert!(matches!(err, DeclareError::EmptyChannelName { .. }));
    }

    #[test]
    fn read_only_registers_output_binding() {
        let mut table = ChannelTable::new();
        table
            .add_read_only(
                "BPM1:XPOS_RD",
                FieldBinding::new("BPM1", "x"),
                &ChannelMetadata::new("Horizontal Position", "m"),
                0.0,
            )
            .unwrap();
        table.add_element("BPM1");
        table.add_element("BPM1");

        assert_eq!(
            table.outputs(),
            &[OutputBinding {
                element: "BPM1".to_owned(),
                quantity: "x".to_owned(),
                channel: "BPM1:XPOS_RD".to_owned(),
            }]
        );
        assert_eq!(table.elements(), &["BPM1".to_owned()]);
        assert!(table.read_write().is_empty());
    }

    #[test]
    fn drive_limits_land_in_setpoint_record() {
        let mut table = ChannelTable::new();
        table
            .add_read_write(
                "CAV1:PHA_CSET",
                "CAV1:PHA_RSET",
                "CAV1:PHA_RD",
                FieldBinding::new("CAV1", "phase"),
                &ChannelMetadata::new("Cavity Phase", "degree")
                    .with_drive(DriveLimit::Explicit { low: 0.0, high: 360.0 }),
                90.0,
            )
            .unwrap();
        let setpoint = table.records().first().unwrap();
        assert_eq!(setpoint.field("DRVH"), Some(&FieldValue::Float(360.0)));
        assert_eq!(setpoint.field("DRVL"), Some(&FieldValue::Float(0.0)));
        assert_eq!(
            table.read_write().first().unwrap().drive,
            Some(DriveRange::new(0.0, 360.0))
        );
    }

    #[test]
    fn database_rendering() {
        let mut table = table_with_quad();
        table
            .add_control(Record {
                record_type: RecordType::Bi,
                name: "SVR:STATUS".to_owned(),
                fields: vec![
                    ("DESC", Some(FieldValue::Text("Status".to_owned()))),
                    ("VAL", Some(FieldValue::Int(1))),
                    ("ZNAM", Some(FieldValue::Text("ERR".to_owned()))),
                ],
            })
            .unwrap();

        let mut buf = Vec::new();
        table.write_database(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.starts_with("record(ao, \"Q1:GRAD_CSET\") {\r\n"));
        assert!(text.contains("    field(\"DESC\", \"Quadrupole Gradient Set Point\")\r\n"));
        assert!(text.contains("    field(\"VAL\", 10.0)\r\n"));
        assert!(text.contains("    field(\"PREC\", 5)\r\n"));
        // Unlimited setpoints have no drive fields.
        assert!(!text.contains("DRVH"));
        assert!(text.contains("record(bi, \"SVR:STATUS\") {\r\n"));
        assert!(text.ends_with("}\r\n\r\n"));
        assert_eq!(text.matches("record(").count(), 4);
    }

    #[test]
    fn control_names_must_be_unique() {
        let mut table = table_with_quad();
        let record = Record {
            record_type: RecordType::Ai,
            name: "Q1:GRAD_RD".to_owned(),
            fields: Vec::new(),
        };
        assert!(table.add_control(record).is_err());
    }
}
