//! Track state and the runtime value model.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use crate::audio::DestinationRef;
use crate::preset::HandlerRef;

use super::error::WalkerError;

/// Tolerance when comparing accumulated beat positions against a bound.
pub const POSITION_EPSILON: f64 = 1e-9;

/// A named field of [`TrackState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackField {
    CurrentTime,
    Position,
    BeatsPerMinute,
    Instrument,
    Effects,
    Duration,
    Velocity,
    VelocityDivisor,
    Pan,
    Destination,
    TrackDuration,
    Custom,
}

const FIELDS: [TrackField; 12] = [
    TrackField::CurrentTime,
    TrackField::Position,
    TrackField::BeatsPerMinute,
    TrackField::Instrument,
    TrackField::Effects,
    TrackField::Duration,
    TrackField::Velocity,
    TrackField::VelocityDivisor,
    TrackField::Pan,
    TrackField::Destination,
    TrackField::TrackDuration,
    TrackField::Custom,
];

impl TrackField {
    /// Field name as written in scores.
    pub fn name(self) -> &'static str {
        match self {
            TrackField::CurrentTime => "currentTime",
            TrackField::Position => "position",
            TrackField::BeatsPerMinute => "beatsPerMinute",
            TrackField::Instrument => "instrument",
            TrackField::Effects => "effects",
            TrackField::Duration => "duration",
            TrackField::Velocity => "velocity",
            TrackField::VelocityDivisor => "velocityDivisor",
            TrackField::Pan => "pan",
            TrackField::Destination => "destination",
            TrackField::TrackDuration => "trackDuration",
            TrackField::Custom => "custom",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        FIELDS.into_iter().find(|f| f.name() == name)
    }
}

/// A field reference as written in a score: a known field or a custom key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldRef {
    Field(TrackField),
    Custom(String),
}

impl FieldRef {
    pub fn from_name(name: &str) -> Self {
        match TrackField::from_name(name) {
            Some(field) => FieldRef::Field(field),
            None => FieldRef::Custom(name.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FieldRef::Field(field) => field.name(),
            FieldRef::Custom(name) => name,
        }
    }
}

impl From<TrackField> for FieldRef {
    fn from(field: TrackField) -> Self {
        FieldRef::Field(field)
    }
}

/// A runtime value of the host language.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Bool(bool),
    Number(f64),
    Str(String),
    List(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Handler(HandlerRef),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Object(_) => "object",
            Value::Handler(_) => "handler",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn as_number(&self, what: &str) -> Result<f64, WalkerError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Str(s) => crate::dsl::overrides::parse_numeric(s)
                .ok_or_else(|| WalkerError::invalid(what, format!("'{s}' is not a number"))),
            other => Err(WalkerError::invalid(
                what,
                format!("expected a number, got {}", other.type_name()),
            )),
        }
    }

    /// `None` for undefined, otherwise a number.
    pub fn as_optional_number(&self, what: &str) -> Result<Option<f64>, WalkerError> {
        match self {
            Value::Undefined => Ok(None),
            other => other.as_number(what).map(Some),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Value {
        match self {
            Value::Object(map) => map.get(key).cloned().unwrap_or_default(),
            Value::List(items) if key == "length" => Value::Number(items.len() as f64),
            Value::Str(s) if key == "length" => Value::Number(s.chars().count() as f64),
            _ => Value::Undefined,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Handler(a), Value::Handler(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("Undefined"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Object(map) => f.debug_tuple("Object").field(map).finish(),
            Value::Handler(h) => write!(f, "Handler({})", h.name()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                f.write_str(&parts.join(","))
            }
            Value::Object(_) => f.write_str("[object]"),
            Value::Handler(h) => write!(f, "[{}]", h.name()),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<Option<f64>> for Value {
    fn from(n: Option<f64>) -> Self {
        n.map_or(Value::Undefined, Value::Number)
    }
}

/// Mutable per-track state.
///
/// `current_time` is in seconds, `position` in beats. Both only move forward
/// within one track.
#[derive(Clone)]
pub struct TrackState {
    pub current_time: f64,
    pub position: f64,
    pub beats_per_minute: f64,
    pub instrument: Option<HandlerRef>,
    pub effects: Vec<HandlerRef>,
    pub duration: Option<f64>,
    pub velocity: Option<f64>,
    pub velocity_divisor: Option<f64>,
    pub pan: Option<f64>,
    pub destination: Option<DestinationRef>,
    pub track_duration: Option<f64>,
    pub custom: BTreeMap<String, Value>,
}

impl fmt::Debug for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackState")
            .field("current_time", &self.current_time)
            .field("position", &self.position)
            .field("beats_per_minute", &self.beats_per_minute)
            .field("instrument", &self.instrument.as_ref().map(|h| h.name().to_string()))
            .field("effects", &self.effects.len())
            .field("duration", &self.duration)
            .field("velocity", &self.velocity)
            .field("track_duration", &self.track_duration)
            .finish_non_exhaustive()
    }
}

impl TrackState {
    pub fn new(beats_per_minute: f64) -> Self {
        Self {
            current_time: 0.0,
            position: 0.0,
            beats_per_minute,
            instrument: None,
            effects: Vec::new(),
            duration: None,
            velocity: None,
            velocity_divisor: None,
            pan: None,
            destination: None,
            track_duration: None,
            custom: BTreeMap::new(),
        }
    }

    /// Seconds per beat at the current tempo.
    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.beats_per_minute
    }

    /// Advance by `beats`. Returns true once the track duration is reached.
    pub fn advance(&mut self, beats: f64) -> Result<bool, WalkerError> {
        if !beats.is_finite() || beats < 0.0 {
            return Err(WalkerError::invalid("wait", format!("duration {beats}")));
        }
        self.position += beats;
        self.current_time += beats * self.seconds_per_beat();
        Ok(self.reached_end())
    }

    pub fn reached_end(&self) -> bool {
        self.track_duration
            .is_some_and(|end| self.position + POSITION_EPSILON >= end)
    }

    pub fn get(&self, field: &FieldRef) -> Value {
        let field = match field {
            FieldRef::Field(field) => *field,
            FieldRef::Custom(name) => return self.custom.get(name).cloned().unwrap_or_default(),
        };
        match field {
            TrackField::CurrentTime => Value::Number(self.current_time),
            TrackField::Position => Value::Number(self.position),
            TrackField::BeatsPerMinute => Value::Number(self.beats_per_minute),
            TrackField::Instrument => self
                .instrument
                .clone()
                .map_or(Value::Undefined, Value::Handler),
            TrackField::Effects => {
                Value::List(self.effects.iter().cloned().map(Value::Handler).collect())
            }
            TrackField::Duration => self.duration.into(),
            TrackField::Velocity => self.velocity.into(),
            TrackField::VelocityDivisor => self.velocity_divisor.into(),
            TrackField::Pan => self.pan.into(),
            TrackField::Destination => self
                .destination
                .as_ref()
                .map_or(Value::Undefined, |d| Value::Str(d.label().to_string())),
            TrackField::TrackDuration => self.track_duration.into(),
            TrackField::Custom => Value::Object(self.custom.clone()),
        }
    }

    /// Assign a field from a script. Time fields may not move backwards.
    pub fn set(&mut self, field: &FieldRef, value: Value) -> Result<(), WalkerError> {
        match field {
            FieldRef::Field(TrackField::CurrentTime) => {
                let to = value.as_number("currentTime")?;
                if to < self.current_time {
                    return Err(WalkerError::TimeReversal {
                        field: "currentTime",
                        from: self.current_time,
                        to,
                    });
                }
                self.current_time = to;
                Ok(())
            }
            FieldRef::Field(TrackField::Position) => {
                let to = value.as_number("position")?;
                if to < self.position {
                    return Err(WalkerError::TimeReversal {
                        field: "position",
                        from: self.position,
                        to,
                    });
                }
                self.position = to;
                Ok(())
            }
            _ => self.merge(field, value),
        }
    }

    /// Overwrite a field without the forward-only check on time fields.
    pub fn merge(&mut self, field: &FieldRef, value: Value) -> Result<(), WalkerError> {
        let field = match field {
            FieldRef::Field(field) => *field,
            FieldRef::Custom(name) => {
                self.custom.insert(name.clone(), value);
                return Ok(());
            }
        };
        let name = field.name();
        match field {
            TrackField::CurrentTime => self.current_time = value.as_number(name)?,
            TrackField::Position => self.position = value.as_number(name)?,
            TrackField::BeatsPerMinute => {
                let bpm = value.as_number(name)?;
                if bpm <= 0.0 || !bpm.is_finite() {
                    return Err(WalkerError::invalid(name, format!("{bpm} must be positive")));
                }
                self.beats_per_minute = bpm;
            }
            TrackField::Instrument => {
                self.instrument = match value {
                    Value::Handler(h) => Some(h),
                    Value::Undefined => None,
                    other => {
                        return Err(WalkerError::invalid(
                            name,
                            format!("expected a handler, got {}", other.type_name()),
                        ))
                    }
                }
            }
            TrackField::Effects => {
                let Value::List(items) = value else {
                    return Err(WalkerError::invalid(name, "expected a list of handlers"));
                };
                self.effects = items
                    .into_iter()
                    .map(|item| match item {
                        Value::Handler(h) => Ok(h),
                        other => Err(WalkerError::invalid(
                            name,
                            format!("expected a handler, got {}", other.type_name()),
                        )),
                    })
                    .collect::<Result<_, _>>()?;
            }
            TrackField::Duration => self.duration = value.as_optional_number(name)?,
            TrackField::Velocity => self.velocity = value.as_optional_number(name)?,
            TrackField::VelocityDivisor => {
                self.velocity_divisor = value.as_optional_number(name)?
            }
            TrackField::Pan => self.pan = value.as_optional_number(name)?,
            TrackField::TrackDuration => self.track_duration = value.as_optional_number(name)?,
            TrackField::Destination => {
                return Err(WalkerError::invalid(name, "audio routing is set by effects"))
            }
            TrackField::Custom => {
                let Value::Object(map) = value else {
                    return Err(WalkerError::invalid(name, "expected an object"));
                };
                self.custom = map;
            }
        }
        Ok(())
    }

    /// Plain-data view of the state, as bound by `const t = await child()`.
    pub fn snapshot(&self) -> Value {
        let mut map = self.custom.clone();
        for field in FIELDS {
            if matches!(field, TrackField::Custom | TrackField::Destination) {
                continue;
            }
            let value = self.get(&FieldRef::Field(field));
            if !matches!(value, Value::Undefined) {
                map.insert(field.name().to_string(), value);
            }
        }
        Value::Object(map)
    }
}

/// What a child track is started from: the caller's state at the call and
/// the call-site overrides.
#[derive(Clone, Debug)]
pub struct TrackContext {
    pub parent: TrackState,
    pub overrides: Vec<(FieldRef, Value)>,
}

impl TrackContext {
    /// Parent fields, then overrides, then `position = 0`.
    pub fn child_state(&self) -> Result<TrackState, WalkerError> {
        let mut state = self.parent.clone();
        for (field, value) in &self.overrides {
            state.merge(field, value.clone())?;
        }
        state.position = 0.0;
        Ok(state)
    }
}

pub type ScopeRef = Rc<RefCell<Scope>>;

/// Variables of one procedure activation. Lookups fall back to the scope of
/// the caller that spawned it.
#[derive(Default)]
pub struct Scope {
    vars: HashMap<String, Value>,
    parent: Option<ScopeRef>,
}

impl Scope {
    pub fn root() -> ScopeRef {
        Rc::new(RefCell::new(Scope::default()))
    }

    pub fn child(parent: &ScopeRef) -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            vars: HashMap::new(),
            parent: Some(Rc::clone(parent)),
        }))
    }

    pub fn declare(scope: &ScopeRef, name: &str, value: Value) {
        scope.borrow_mut().vars.insert(name.to_string(), value);
    }

    pub fn lookup(scope: &ScopeRef, name: &str) -> Option<Value> {
        let mut current = Some(Rc::clone(scope));
        while let Some(s) = current {
            let s = s.borrow();
            if let Some(v) = s.vars.get(name) {
                return Some(v.clone());
            }
            current = s.parent.clone();
        }
        None
    }

    /// Assign to the nearest declaration. Returns false if none exists.
    pub fn assign(scope: &ScopeRef, name: &str, value: Value) -> bool {
        let mut current = Some(Rc::clone(scope));
        while let Some(s) = current {
            let mut s = s.borrow_mut();
            if let Some(slot) = s.vars.get_mut(name) {
                *slot = value;
                return true;
            }
            current = s.parent.clone();
        }
        false
    }
}
