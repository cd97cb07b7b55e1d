//! Validated, presence-flagged, change-notifying field store.
//!
//! A [`PropertyStore`] holds one slot per entry of a hand-authored field
//! table ([`FieldSet::TABLE`]). Each slot carries a typed [`Value`] and a
//! presence flag that separates "never set" from "set to the default".
//!
//! Validation and side effects live outside the store in a [`FieldHooks`]
//! implementation, so the same store type backs both the persisted Config and
//! the transient State while each supplies its own rules and hardware
//! handlers.
//!
//! ```text
//! set(field, value)
//!   ├─ type check against the field default     → TypeMismatch
//!   ├─ hooks.validate(field, value, store)       → Rejected
//!   ├─ commit value, mark present
//!   └─ hooks.on_change(field, store)             → HandlerFailed (rolled back)
//! ```

use core::fmt;
use core::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// Maximum number of fields in one table.
pub const MAX_FIELDS: usize = 16;

/// Byte capacity of a text value.
pub const TEXT_CAPACITY: usize = 32;

/// Fixed-capacity text value.
pub type Text = heapless::String<TEXT_CAPACITY>;

// ── Values ───────────────────────────────────────────────────────────────────

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Boolean flag
    Bool(bool),
    /// Unsigned integer
    U32(u32),
    /// Single-precision float
    F32(f32),
    /// Short text
    Text(Text),
}

/// Discriminant of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ValueKind {
    /// [`Value::Bool`]
    Bool,
    /// [`Value::U32`]
    U32,
    /// [`Value::F32`]
    F32,
    /// [`Value::Text`]
    Text,
}

impl Value {
    /// Build a text value, `None` if `text` exceeds [`TEXT_CAPACITY`].
    pub fn text(text: &str) -> Option<Self> {
        let mut out = Text::new();
        out.push_str(text).ok()?;
        Some(Self::Text(out))
    }

    /// Kind of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::U32(_) => ValueKind::U32,
            Self::F32(_) => ValueKind::F32,
            Self::Text(_) => ValueKind::Text,
        }
    }

    /// Boolean payload
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer payload
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }

    /// Float payload
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::F32(v) => Some(*v),
            _ => None,
        }
    }

    /// Text payload
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}

/// Compile-time default for a field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldDefault {
    /// Boolean default
    Bool(bool),
    /// Integer default
    U32(u32),
    /// Float default
    F32(f32),
    /// Text default (must fit [`TEXT_CAPACITY`])
    Text(&'static str),
}

impl FieldDefault {
    /// Materialize as a [`Value`]. Over-long text defaults become empty.
    pub fn to_value(self) -> Value {
        match self {
            Self::Bool(v) => Value::Bool(v),
            Self::U32(v) => Value::U32(v),
            Self::F32(v) => Value::F32(v),
            Self::Text(v) => Value::text(v).unwrap_or(Value::Text(Text::new())),
        }
    }

    /// Kind every value of this field must have
    pub fn kind(self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::U32(_) => ValueKind::U32,
            Self::F32(_) => ValueKind::F32,
            Self::Text(_) => ValueKind::Text,
        }
    }
}

// ── Field tables ─────────────────────────────────────────────────────────────

/// One row of a field table.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor<F> {
    /// Stable field identifier
    pub field: F,
    /// Wire/display name
    pub name: &'static str,
    /// Value after `reset()`
    pub default: FieldDefault,
}

/// A stable enumeration of fields plus its descriptor table.
///
/// `TABLE` order is the declaration order used by
/// [`PropertyStore::validate`] and by persistence.
pub trait FieldSet: Copy + PartialEq + 'static {
    /// Hand-authored descriptor table, at most [`MAX_FIELDS`] rows.
    const TABLE: &'static [FieldDescriptor<Self>];

    /// Position of this field in [`Self::TABLE`].
    fn position(self) -> Option<usize> {
        Self::TABLE.iter().position(|d| d.field == self)
    }

    /// Descriptor row for this field.
    fn descriptor(self) -> Option<&'static FieldDescriptor<Self>> {
        Self::TABLE.iter().find(|d| d.field == self)
    }

    /// Field name, `"?"` for fields missing from the table.
    fn name(self) -> &'static str {
        self.descriptor().map_or("?", |d| d.name)
    }

    /// Look up a field by name.
    fn from_name(name: &str) -> Option<Self> {
        Self::TABLE.iter().find(|d| d.name == name).map(|d| d.field)
    }
}

// ── Hooks ────────────────────────────────────────────────────────────────────

/// Per-field validation and change notification.
///
/// Both methods receive the store. In `validate` it still holds the old
/// value; in `on_change` the field's new value is committed but siblings are
/// whatever they were before the call.
pub trait FieldHooks<F: FieldSet> {
    /// Accept or reject `value` for `field`. Must not have side effects.
    fn validate(&self, field: F, value: &Value, store: &PropertyStore<F>) -> bool {
        let _ = (field, value, store);
        true
    }

    /// Apply the committed value of `field`. Returning `false` rolls the
    /// field back to its previous value.
    fn on_change(&mut self, field: F, store: &PropertyStore<F>) -> bool {
        let _ = (field, store);
        true
    }
}

/// Hooks that accept everything and do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl<F: FieldSet> FieldHooks<F> for NoHooks {}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Rejected mutation of a property store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PropertyError {
    /// The field is not in this store's table
    UnknownField,
    /// Value kind differs from the field's declared kind
    TypeMismatch {
        /// Field name
        field: &'static str,
        /// Kind the field holds
        expected: ValueKind,
    },
    /// The field validator refused the value
    Rejected {
        /// Field name
        field: &'static str,
    },
    /// The change handler failed; the previous value was restored
    HandlerFailed {
        /// Field name
        field: &'static str,
    },
}

impl fmt::Display for PropertyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownField => write!(f, "unknown field"),
            Self::TypeMismatch { field, .. } => write!(f, "wrong value type for {field}"),
            Self::Rejected { field } => write!(f, "value rejected for {field}"),
            Self::HandlerFailed { field } => write!(f, "change handler failed for {field}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PropertyError {}

/// Outcome of [`PropertyStore::validate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ValidationReport {
    /// Present fields visited
    pub checked: u8,
    /// Fields whose stored value failed validation (left unchanged)
    pub rejected: u8,
    /// Fields whose change handler reported failure
    pub handler_failures: u8,
}

impl ValidationReport {
    /// No rejections and no handler failures
    pub fn is_clean(&self) -> bool {
        self.rejected == 0 && self.handler_failures == 0
    }
}

// ── Store ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    value: Value,
    present: bool,
}

/// Persisted form of one slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Presence flag
    pub present: bool,
    /// Stored value
    pub value: Value,
}

/// Snapshot of every slot in table order.
pub type Snapshot = heapless::Vec<Record, MAX_FIELDS>;

/// Field store over the table of `F`.
#[derive(Debug, Clone)]
pub struct PropertyStore<F: FieldSet> {
    slots: heapless::Vec<Slot, MAX_FIELDS>,
    _fields: PhantomData<F>,
}

impl<F: FieldSet> Default for PropertyStore<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: FieldSet> PropertyStore<F> {
    /// Store holding defaults with no field present
    pub fn new() -> Self {
        let mut store = Self {
            slots: heapless::Vec::new(),
            _fields: PhantomData,
        };
        store.reset();
        store
    }

    /// Reload defaults and clear every presence flag. No hooks run.
    pub fn reset(&mut self) {
        self.slots.clear();
        for descriptor in F::TABLE.iter().take(MAX_FIELDS) {
            // Cannot fail: take() bounds the count to the capacity.
            let _ = self.slots.push(Slot {
                value: descriptor.default.to_value(),
                present: false,
            });
        }
    }

    fn slot(&self, field: F) -> Option<&Slot> {
        field.position().and_then(|i| self.slots.get(i))
    }

    fn slot_mut(&mut self, field: F) -> Option<&mut Slot> {
        field.position().and_then(|i| self.slots.get_mut(i))
    }

    /// Current value of `field`
    pub fn get(&self, field: F) -> Option<&Value> {
        self.slot(field).map(|s| &s.value)
    }

    /// Whether `field` has been set (or explicitly marked) since the last reset
    pub fn is_present(&self, field: F) -> bool {
        self.slot(field).is_some_and(|s| s.present)
    }

    /// Mark `field` present without changing its value or running hooks.
    pub fn mark_present(&mut self, field: F) {
        if let Some(slot) = self.slot_mut(field) {
            slot.present = true;
        }
    }

    /// Mark every field present.
    pub fn mark_all_present(&mut self) {
        for slot in &mut self.slots {
            slot.present = true;
        }
    }

    /// Boolean value of `field`, falling back to `false`
    pub fn get_bool(&self, field: F) -> bool {
        self.get(field).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Integer value of `field`, falling back to `0`
    pub fn get_u32(&self, field: F) -> u32 {
        self.get(field).and_then(Value::as_u32).unwrap_or(0)
    }

    /// Float value of `field`, falling back to `0.0`
    pub fn get_f32(&self, field: F) -> f32 {
        self.get(field).and_then(Value::as_f32).unwrap_or(0.0)
    }

    /// Text value of `field`, falling back to `""`
    pub fn get_text(&self, field: F) -> &str {
        self.get(field).and_then(Value::as_text).unwrap_or("")
    }

    /// Iterate `(field, value, present)` in table order.
    pub fn iter(&self) -> impl Iterator<Item = (F, &Value, bool)> + '_ {
        F::TABLE
            .iter()
            .zip(self.slots.iter())
            .map(|(d, s)| (d.field, &s.value, s.present))
    }

    /// The single mutation path: type check, validate, commit, notify.
    pub fn set<H>(&mut self, field: F, value: Value, hooks: &mut H) -> Result<(), PropertyError>
    where
        H: FieldHooks<F> + ?Sized,
    {
        let descriptor = field.descriptor().ok_or(PropertyError::UnknownField)?;
        let expected = descriptor.default.kind();
        if value.kind() != expected {
            return Err(PropertyError::TypeMismatch {
                field: descriptor.name,
                expected,
            });
        }
        if !hooks.validate(field, &value, self) {
            log_debug!("rejected {}", descriptor.name);
            return Err(PropertyError::Rejected {
                field: descriptor.name,
            });
        }

        let slot = self.slot_mut(field).ok_or(PropertyError::UnknownField)?;
        let previous = core::mem::replace(
            slot,
            Slot {
                value,
                present: true,
            },
        );

        if hooks.on_change(field, self) {
            Ok(())
        } else {
            log_warn!("handler failed for {}, restoring", descriptor.name);
            if let Some(slot) = self.slot_mut(field) {
                *slot = previous;
            }
            Err(PropertyError::HandlerFailed {
                field: descriptor.name,
            })
        }
    }

    /// Re-run validation and change dispatch for every present field, in
    /// table order. Values that fail validation are left as they are and
    /// their handlers do not run.
    pub fn validate<H>(&mut self, hooks: &mut H) -> ValidationReport
    where
        H: FieldHooks<F> + ?Sized,
    {
        let mut report = ValidationReport::default();
        for (descriptor, index) in F::TABLE.iter().zip(0..self.slots.len()) {
            let Some(slot) = self.slots.get(index) else {
                break;
            };
            if !slot.present {
                continue;
            }
            report.checked = report.checked.saturating_add(1);
            if !hooks.validate(descriptor.field, &slot.value, self) {
                log_warn!("stored {} failed validation", descriptor.name);
                report.rejected = report.rejected.saturating_add(1);
                continue;
            }
            if !hooks.on_change(descriptor.field, self) {
                log_warn!("handler failed for {}", descriptor.name);
                report.handler_failures = report.handler_failures.saturating_add(1);
            }
        }
        report
    }

    /// Copy every slot out in table order.
    pub fn snapshot(&self) -> Snapshot {
        self.slots
            .iter()
            .map(|s| Record {
                present: s.present,
                value: s.value.clone(),
            })
            .collect()
    }

    /// Replace every slot from `records`.
    ///
    /// Fails without modifying the store unless `records` has exactly one
    /// entry per table row with matching value kinds.
    pub fn restore(&mut self, records: &[Record]) -> Result<(), PropertyError> {
        if records.len() != self.slots.len() {
            return Err(PropertyError::UnknownField);
        }
        for (descriptor, record) in F::TABLE.iter().zip(records) {
            let expected = descriptor.default.kind();
            if record.value.kind() != expected {
                return Err(PropertyError::TypeMismatch {
                    field: descriptor.name,
                    expected,
                });
            }
        }
        for (slot, record) in self.slots.iter_mut().zip(records) {
            slot.value = record.value.clone();
            slot.present = record.present;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Demo {
        Level,
        Enabled,
        Name,
    }

    impl FieldSet for Demo {
        const TABLE: &'static [FieldDescriptor<Self>] = &[
            FieldDescriptor {
                field: Demo::Level,
                name: "level",
                default: FieldDefault::F32(1.0),
            },
            FieldDescriptor {
                field: Demo::Enabled,
                name: "enabled",
                default: FieldDefault::Bool(false),
            },
            FieldDescriptor {
                field: Demo::Name,
                name: "name",
                default: FieldDefault::Text("demo"),
            },
        ];
    }

    /// Accepts levels up to 10, records every change, optionally fails.
    #[derive(Default)]
    struct Recorder {
        changes: std::vec::Vec<(Demo, Value, bool)>,
        fail_handler: bool,
    }

    impl FieldHooks<Demo> for Recorder {
        fn validate(&self, field: Demo, value: &Value, _: &PropertyStore<Demo>) -> bool {
            match field {
                Demo::Level => value.as_f32().is_some_and(|v| v <= 10.0),
                _ => true,
            }
        }

        fn on_change(&mut self, field: Demo, store: &PropertyStore<Demo>) -> bool {
            let sibling = store.get_bool(Demo::Enabled);
            self.changes
                .push((field, store.get(field).unwrap().clone(), sibling));
            !self.fail_handler
        }
    }

    #[test]
    fn new_store_holds_defaults_and_nothing_present() {
        let store = PropertyStore::<Demo>::new();
        assert_eq!(store.get_f32(Demo::Level), 1.0);
        assert_eq!(store.get_text(Demo::Name), "demo");
        assert!(store.iter().all(|(_, _, present)| !present));
    }

    #[test]
    fn set_commits_marks_present_and_notifies_with_new_value() {
        let mut store = PropertyStore::<Demo>::new();
        let mut hooks = Recorder::default();
        store.set(Demo::Level, Value::F32(5.0), &mut hooks).unwrap();

        assert_eq!(store.get_f32(Demo::Level), 5.0);
        assert!(store.is_present(Demo::Level));
        assert_eq!(hooks.changes, [(Demo::Level, Value::F32(5.0), false)]);
    }

    #[test]
    fn rejected_value_leaves_field_untouched() {
        let mut store = PropertyStore::<Demo>::new();
        let mut hooks = Recorder::default();
        let err = store.set(Demo::Level, Value::F32(11.0), &mut hooks);

        assert_eq!(err, Err(PropertyError::Rejected { field: "level" }));
        assert_eq!(store.get_f32(Demo::Level), 1.0);
        assert!(!store.is_present(Demo::Level));
        assert!(hooks.changes.is_empty());
    }

    #[test]
    fn wrong_kind_is_rejected_before_validation() {
        let mut store = PropertyStore::<Demo>::new();
        let err = store.set(Demo::Enabled, Value::U32(1), &mut NoHooks);
        assert_eq!(
            err,
            Err(PropertyError::TypeMismatch {
                field: "enabled",
                expected: ValueKind::Bool
            })
        );
    }

    #[test]
    fn failed_handler_rolls_back() {
        let mut store = PropertyStore::<Demo>::new();
        let mut hooks = Recorder {
            fail_handler: true,
            ..Recorder::default()
        };
        let err = store.set(Demo::Level, Value::F32(3.0), &mut hooks);

        assert_eq!(err, Err(PropertyError::HandlerFailed { field: "level" }));
        assert_eq!(store.get_f32(Demo::Level), 1.0);
        assert!(!store.is_present(Demo::Level));
    }

    #[test]
    fn reset_restores_defaults_without_hooks() {
        let mut store = PropertyStore::<Demo>::new();
        store.set(Demo::Enabled, true.into(), &mut NoHooks).unwrap();
        store.reset();
        assert!(!store.get_bool(Demo::Enabled));
        assert!(!store.is_present(Demo::Enabled));
    }

    #[test]
    fn validate_visits_present_fields_in_table_order() {
        let mut store = PropertyStore::<Demo>::new();
        store.mark_present(Demo::Name);
        store.mark_present(Demo::Level);
        let mut hooks = Recorder::default();

        let report = store.validate(&mut hooks);

        assert_eq!(report.checked, 2);
        assert!(report.is_clean());
        let order: std::vec::Vec<Demo> = hooks.changes.iter().map(|c| c.0).collect();
        assert_eq!(order, [Demo::Level, Demo::Name]);
    }

    #[test]
    fn validate_skips_handler_for_invalid_stored_value() {
        let mut store = PropertyStore::<Demo>::new();
        store
            .restore(&[
                Record {
                    present: true,
                    value: Value::F32(50.0),
                },
                Record {
                    present: true,
                    value: Value::Bool(true),
                },
                Record {
                    present: false,
                    value: Value::text("x").unwrap(),
                },
            ])
            .unwrap();
        let mut hooks = Recorder::default();

        let report = store.validate(&mut hooks);

        assert_eq!(report.checked, 2);
        assert_eq!(report.rejected, 1);
        assert_eq!(hooks.changes.len(), 1);
        assert_eq!(hooks.changes[0].0, Demo::Enabled);
    }

    #[test]
    fn restore_rejects_shape_mismatch() {
        let mut store = PropertyStore::<Demo>::new();
        let short = [Record {
            present: true,
            value: Value::F32(2.0),
        }];
        assert!(store.restore(&short).is_err());
        assert_eq!(store.get_f32(Demo::Level), 1.0);
    }

    #[test]
    fn text_values_respect_capacity() {
        assert!(Value::text(&"a".repeat(TEXT_CAPACITY)).is_some());
        assert!(Value::text(&"a".repeat(TEXT_CAPACITY + 1)).is_none());
    }

    #[test]
    fn fields_resolve_by_name() {
        assert_eq!(Demo::from_name("enabled"), Some(Demo::Enabled));
        assert_eq!(Demo::from_name("missing"), None);
        assert_eq!(Demo::Name.name(), "name");
    }
}
