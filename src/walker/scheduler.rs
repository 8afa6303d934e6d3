//! Cooperative task scheduler and instruction interpreter.
//!
//! Every running track procedure is a [`Task`]: a program counter, a private
//! [`TrackState`] and a variable scope. A task runs until it waits, spawns a
//! child, or ends. A spawned child runs before its parent continues; waiting
//! tasks are resumed in order of song time, then spawn order.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use crate::dsl::note::parse_note;
use crate::dsl::program::{
    AssignOp, BinaryOp, Binding, Expr, HostStmt, Instr, Place, Program, UnaryOp, ROOT_PROCEDURE,
};
use crate::preset::{HandlerRef, PresetCatalog, PresetConfig, PresetKind};

use super::error::WalkerError;
use super::state::{FieldRef, Scope, ScopeRef, TrackContext, TrackField, TrackState, Value};
use super::strategy::Strategy;

/// Instructions a task may run without waiting.
pub const MAX_STEPS_PER_SLICE: usize = 1_000_000;
/// Tasks alive at the same time.
pub const MAX_LIVE_TASKS: usize = 10_000;

const ROOT_TASK: usize = 0;

/// Summary of a finished walk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Latest `currentTime` reached by any track, in seconds.
    pub duration: f64,
    /// Final position of the root track, in beats.
    pub root_position: f64,
    /// Final `currentTime` of the root track.
    pub root_time: f64,
    /// Commands handed to the strategy.
    pub commands: usize,
    /// Commands the strategy skipped as late.
    pub dropped: usize,
    /// Tracks started, including the root.
    pub tracks: usize,
    /// The walk was cancelled before every track finished.
    pub stopped: bool,
}

/// Limits guarding against scores that never yield.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_steps: usize,
    pub max_tasks: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: MAX_STEPS_PER_SLICE,
            max_tasks: MAX_LIVE_TASKS,
        }
    }
}

/// Who is blocked on a task finishing.
struct Waiter {
    task: usize,
    binding: Option<Binding>,
}

struct Task {
    id: usize,
    /// Spawn order; ids are reused, this is not.
    seq: usize,
    proc: usize,
    pc: usize,
    state: TrackState,
    /// Consumed by `EnterTrack`.
    context: Option<TrackContext>,
    args: Vec<Value>,
    scope: ScopeRef,
    waiter: Option<Waiter>,
}

/// Why a slice ended.
enum Slice {
    Suspended(f64),
    /// `binding` is set only for awaited calls.
    Spawned {
        child: Task,
        awaited: bool,
        binding: Option<Binding>,
    },
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Wakeup {
    time: f64,
    seq: usize,
    task: usize,
}

impl Eq for Wakeup {}

impl Ord for Wakeup {
    // Reversed for the max-heap: earliest time, then earliest spawn, first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Wakeup {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct Scheduler<'a, S: Strategy> {
    program: &'a Program,
    catalog: &'a PresetCatalog,
    strategy: &'a mut S,
    limits: Limits,
    tasks: Vec<Option<Task>>,
    /// Slots of ended tasks, reused by `spawn`.
    free: Vec<usize>,
    run_stack: Vec<usize>,
    sleeping: BinaryHeap<Wakeup>,
    globals: ScopeRef,
    live: usize,
    report: RunReport,
}

impl<'a, S: Strategy> Scheduler<'a, S> {
    pub fn new(program: &'a Program, catalog: &'a PresetCatalog, strategy: &'a mut S) -> Self {
        Self {
            program,
            catalog,
            strategy,
            limits: Limits::default(),
            tasks: Vec::new(),
            free: Vec::new(),
            run_stack: Vec::new(),
            sleeping: BinaryHeap::new(),
            globals: Scope::root(),
            live: 0,
            report: RunReport::default(),
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Walk the program from the root procedure until every track ends, the
    /// root fails, or the strategy stops the walk.
    pub fn run(mut self, root: TrackState) -> Result<RunReport, WalkerError> {
        self.report.root_time = root.current_time;
        self.report.duration = root.current_time;
        let id = self.spawn(ROOT_PROCEDURE, root, None, Vec::new(), self.globals.clone())?;
        self.run_stack.push(id);

        loop {
            if self.strategy.is_stopped() {
                self.report.stopped = true;
                break;
            }
            let id = match self.run_stack.pop() {
                Some(id) => id,
                None => match self.sleeping.pop() {
                    Some(wakeup) => {
                        if !self.strategy.pace(wakeup.time) {
                            self.report.stopped = true;
                            break;
                        }
                        wakeup.task
                    }
                    None => break,
                },
            };
            let Some(mut task) = self.tasks.get_mut(id).and_then(Option::take) else {
                continue;
            };
            match self.run_slice(&mut task) {
                Ok(Slice::Suspended(time)) => {
                    self.sleeping.push(Wakeup {
                        time,
                        seq: task.seq,
                        task: id,
                    });
                    self.tasks[id] = Some(task);
                }
                Ok(Slice::Spawned {
                    mut child,
                    awaited,
                    binding,
                }) => {
                    let child_id = child.id;
                    if awaited {
                        child.waiter = Some(Waiter { task: id, binding });
                    } else {
                        self.run_stack.push(id);
                    }
                    self.tasks[id] = Some(task);
                    self.tasks[child_id] = Some(child);
                    self.run_stack.push(child_id);
                }
                Ok(Slice::Finished) => self.finish(task)?,
                Err(err) => self.fail(task, err)?,
            }
        }

        self.report.dropped = self.strategy.dropped();
        self.strategy.finish(self.report.duration)?;
        log::debug!(
            "{} walk done: {} tracks, {} commands, {:.3}s",
            self.strategy.name(),
            self.report.tracks,
            self.report.commands,
            self.report.duration
        );
        Ok(self.report)
    }

    fn spawn(
        &mut self,
        proc: usize,
        state: TrackState,
        context: Option<TrackContext>,
        args: Vec<Value>,
        scope: ScopeRef,
    ) -> Result<usize, WalkerError> {
        if self.live >= self.limits.max_tasks {
            return Err(WalkerError::TooManyTracks(self.limits.max_tasks));
        }
        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                self.tasks.push(None);
                self.tasks.len() - 1
            }
        };
        let seq = self.report.tracks;
        self.live += 1;
        self.report.tracks += 1;
        self.tasks[id] = Some(Task {
            id,
            seq,
            proc,
            pc: 0,
            state,
            context,
            args,
            scope,
            waiter: None,
        });
        Ok(id)
    }

    fn track_name(&self, task: &Task) -> &str {
        &self.program.procedures[task.proc].name
    }

    /// An ended task is on neither the run stack nor the wakeup heap, so its
    /// slot is free. The root slot is never reused.
    fn retire(&mut self, task: &Task) {
        self.live = self.live.saturating_sub(1);
        if task.id == ROOT_TASK {
            self.report.root_position = task.state.position;
            self.report.root_time = task.state.current_time;
        } else {
            self.free.push(task.id);
        }
        self.note_time(task.state.current_time);
    }

    fn note_time(&mut self, time: f64) {
        if time > self.report.duration {
            self.report.duration = time;
        }
    }

    fn finish(&mut self, task: Task) -> Result<(), WalkerError> {
        self.retire(&task);
        log::trace!("track '{}' finished", self.track_name(&task));
        let Some(waiter) = task.waiter else {
            return Ok(());
        };
        let Some(mut parent) = self.tasks.get_mut(waiter.task).and_then(Option::take) else {
            return Ok(());
        };
        let delivered = match &waiter.binding {
            Some(binding) => bind(&mut parent, binding, task.state.snapshot(), &self.globals),
            None => Ok(()),
        };
        match delivered {
            Ok(()) => {
                self.tasks[waiter.task] = Some(parent);
                self.run_stack.push(waiter.task);
                Ok(())
            }
            Err(err) => self.fail(parent, err),
        }
    }

    /// End a failed task. The error moves to an awaiting parent; an error
    /// reaching the root ends the walk; otherwise only this track ends.
    fn fail(&mut self, task: Task, err: WalkerError) -> Result<(), WalkerError> {
        self.retire(&task);
        if let Some(waiter) = &task.waiter {
            if let Some(parent) = self.tasks.get_mut(waiter.task).and_then(Option::take) {
                return self.fail(parent, err);
            }
        }
        if task.id == ROOT_TASK {
            return Err(err);
        }
        log::error!("track '{}' failed: {err}", self.track_name(&task));
        Ok(())
    }

    fn run_slice(&mut self, task: &mut Task) -> Result<Slice, WalkerError> {
        let program = self.program;
        let body = &program.procedures[task.proc].body;
        let mut steps = 0usize;
        while let Some(instr) = body.get(task.pc) {
            steps += 1;
            if steps > self.limits.max_steps {
                return Err(WalkerError::RunawayTrack(
                    program.procedures[task.proc].name.clone(),
                ));
            }
            match instr {
                Instr::EnterTrack => {
                    if let Some(context) = task.context.take() {
                        task.state = context.child_state()?;
                    }
                    let params = &program.procedures[task.proc].params;
                    let mut args = std::mem::take(&mut task.args).into_iter();
                    for param in params {
                        Scope::declare(&task.scope, param, args.next().unwrap_or_default());
                    }
                    task.pc += 1;
                }
                Instr::Execute { command, overrides } => {
                    let overrides = overrides
                        .iter()
                        .map(|(field, expr)| Ok((*field, self.eval(task, expr)?)))
                        .collect::<Result<Vec<_>, WalkerError>>()?;
                    self.report.commands += 1;
                    self.strategy.execute(&task.state, command, &overrides)?;
                    task.pc += 1;
                }
                Instr::Wait { duration, guarded } => {
                    let beats = self.eval(task, duration)?.as_number("wait")?;
                    let outcome = self.strategy.wait(&mut task.state, beats)?;
                    self.note_time(task.state.current_time);
                    task.pc += 1;
                    if *guarded && outcome.finished {
                        return Ok(Slice::Finished);
                    }
                    return Ok(Slice::Suspended(outcome.resume_at));
                }
                Instr::Call {
                    target,
                    overrides,
                    args,
                    awaited,
                    binding,
                } => {
                    let proc = program
                        .lookup(target)
                        .ok_or_else(|| WalkerError::UnknownTrack(target.clone()))?;
                    let overrides = overrides
                        .iter()
                        .map(|(field, expr)| Ok((field.clone(), self.eval(task, expr)?)))
                        .collect::<Result<Vec<_>, WalkerError>>()?;
                    let args = args
                        .iter()
                        .map(|expr| self.eval(task, expr))
                        .collect::<Result<Vec<_>, WalkerError>>()?;
                    let context = TrackContext {
                        parent: task.state.clone(),
                        overrides,
                    };
                    let scope = Scope::child(&task.scope);
                    let id = self.spawn(proc, task.state.clone(), Some(context), args, scope)?;
                    let child = self.tasks[id].take().ok_or_else(|| {
                        WalkerError::invalid("track", format!("task {id} vanished"))
                    })?;
                    if !awaited {
                        // Not awaited: the target is bound before the child runs.
                        if let Some(binding) = binding {
                            bind(task, binding, Value::Undefined, &self.globals)?;
                        }
                    }
                    task.pc += 1;
                    return Ok(Slice::Spawned {
                        child,
                        awaited: *awaited,
                        binding: binding.clone().filter(|_| *awaited),
                    });
                }
                Instr::Host(stmt) => {
                    self.exec(task, stmt)?;
                    task.pc += 1;
                }
                Instr::JumpUnless { cond, target } => {
                    task.pc = if self.eval(task, cond)?.truthy() {
                        task.pc + 1
                    } else {
                        *target
                    };
                }
                Instr::Jump(target) => task.pc = *target,
            }
        }
        Ok(Slice::Finished)
    }

    fn exec(&mut self, task: &mut Task, stmt: &HostStmt) -> Result<(), WalkerError> {
        match stmt {
            HostStmt::Declare { name, value } => {
                let value = self.eval(task, value)?;
                Scope::declare(&task.scope, name, value);
            }
            HostStmt::Assign { place, op, value } => {
                let value = self.eval(task, value)?;
                let value = match op {
                    AssignOp::Set => value,
                    AssignOp::Add => binary(BinaryOp::Add, read_place(task, place)?, value)?,
                    AssignOp::Sub => binary(BinaryOp::Sub, read_place(task, place)?, value)?,
                    AssignOp::Mul => binary(BinaryOp::Mul, read_place(task, place)?, value)?,
                    AssignOp::Div => binary(BinaryOp::Div, read_place(task, place)?, value)?,
                };
                write_place(task, place, value, &self.globals)?;
            }
            HostStmt::Eval(expr) => {
                self.eval(task, expr)?;
            }
        }
        Ok(())
    }

    fn eval(&mut self, task: &mut Task, expr: &Expr) -> Result<Value, WalkerError> {
        Ok(match expr {
            Expr::Undefined => Value::Undefined,
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Number(n) => Value::Number(*n),
            Expr::Str(s) => Value::Str(s.clone()),
            Expr::Var(name) if name == "track" => task.state.snapshot(),
            Expr::Var(name) => Scope::lookup(&task.scope, name)
                .ok_or_else(|| WalkerError::UndefinedVariable(name.clone()))?,
            Expr::Member(object, field) => match object.as_ref() {
                Expr::Var(name) if name == "track" => task.state.get(&FieldRef::from_name(field)),
                other => self.eval(task, other)?.get(field),
            },
            Expr::List(items) => Value::List(
                items
                    .iter()
                    .map(|item| self.eval(task, item))
                    .collect::<Result<_, _>>()?,
            ),
            Expr::Object(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    let value = self.eval(task, value)?;
                    map.insert(key.clone(), value);
                }
                Value::Object(map)
            }
            Expr::Unary(UnaryOp::Not, operand) => Value::Bool(!self.eval(task, operand)?.truthy()),
            Expr::Unary(UnaryOp::Neg, operand) => {
                Value::Number(-self.eval(task, operand)?.as_number("negation")?)
            }
            Expr::Binary(BinaryOp::And, left, right) => {
                let left = self.eval(task, left)?;
                if left.truthy() {
                    self.eval(task, right)?
                } else {
                    left
                }
            }
            Expr::Binary(BinaryOp::Or, left, right) => {
                let left = self.eval(task, left)?;
                if left.truthy() {
                    left
                } else {
                    self.eval(task, right)?
                }
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(task, left)?;
                let right = self.eval(task, right)?;
                binary(*op, left, right)?
            }
            Expr::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(task, arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call_builtin(task, name, args)?
            }
        })
    }

    fn call_builtin(
        &mut self,
        task: &mut Task,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, WalkerError> {
        let mut args = args.into_iter();
        match name {
            "loadPreset" => {
                let query = args.next().unwrap_or_default();
                let query = query
                    .as_str()
                    .ok_or_else(|| WalkerError::invalid("loadPreset", "expected a preset name"))?;
                let config: PresetConfig = match args.next().unwrap_or_default() {
                    Value::Object(map) => map,
                    Value::Undefined => PresetConfig::new(),
                    other => {
                        return Err(WalkerError::invalid(
                            "loadPreset",
                            format!("config must be an object, got {}", other.type_name()),
                        ))
                    }
                };
                let preset = self.catalog.find(query)?;
                let handler = self.strategy.load_preset(&preset, &config)?;
                log::debug!("loaded preset '{}'", preset.title);
                if preset.kind == PresetKind::Instrument {
                    self.install_root_instrument(task, &handler);
                }
                Ok(Value::Handler(handler))
            }
            "parseNote" => {
                let name = args.next().unwrap_or_default();
                Ok(name
                    .as_str()
                    .and_then(parse_note)
                    .map_or(Value::Undefined, |note| {
                        let mut map = BTreeMap::new();
                        map.insert("note".to_string(), Value::Str(note.note));
                        map.insert("octave".to_string(), Value::Number(note.octave as f64));
                        map.insert("frequency".to_string(), Value::Number(note.frequency));
                        Value::Object(map)
                    }))
            }
            "execute" => {
                let _track = args.next();
                let command = args.next().unwrap_or_default();
                let command = command
                    .as_str()
                    .ok_or_else(|| WalkerError::invalid("execute", "expected a command string"))?
                    .to_string();
                let overrides = match args.next().unwrap_or_default() {
                    Value::Object(map) => map
                        .into_iter()
                        .map(|(key, value)| {
                            TrackField::from_name(&key)
                                .map(|field| (field, value))
                                .ok_or_else(|| {
                                    WalkerError::invalid("execute", format!("unknown field '{key}'"))
                                })
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                    _ => Vec::new(),
                };
                self.report.commands += 1;
                self.strategy.execute(&task.state, &command, &overrides)?;
                Ok(Value::Undefined)
            }
            other => Err(WalkerError::UnknownFunction(other.to_string())),
        }
    }

    /// A loaded instrument becomes the root track's if it has none yet.
    fn install_root_instrument(&mut self, task: &mut Task, handler: &HandlerRef) {
        let root = if task.id == ROOT_TASK {
            Some(&mut task.state)
        } else {
            self.tasks
                .get_mut(ROOT_TASK)
                .and_then(Option::as_mut)
                .map(|root| &mut root.state)
        };
        if let Some(state) = root {
            if state.instrument.is_none() {
                state.instrument = Some(handler.clone());
            }
        }
    }
}

fn read_place(task: &Task, place: &Place) -> Result<Value, WalkerError> {
    match place {
        Place::Var(name) => Scope::lookup(&task.scope, name)
            .ok_or_else(|| WalkerError::UndefinedVariable(name.clone())),
        Place::Track(field) => Ok(task.state.get(field)),
    }
}

/// Undeclared variables are created as globals.
fn write_place(
    task: &mut Task,
    place: &Place,
    value: Value,
    globals: &ScopeRef,
) -> Result<(), WalkerError> {
    match place {
        Place::Var(name) => {
            if !Scope::assign(&task.scope, name, value.clone()) {
                Scope::declare(globals, name, value);
            }
            Ok(())
        }
        Place::Track(field) => task.state.set(field, value),
    }
}

fn bind(task: &mut Task, binding: &Binding, value: Value, globals: &ScopeRef) -> Result<(), WalkerError> {
    match (&binding.place, binding.declare) {
        (Place::Var(name), true) => {
            Scope::declare(&task.scope, name, value);
            Ok(())
        }
        (place, _) => write_place(task, place, value, globals),
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, WalkerError> {
    let what = "expression";
    Ok(match op {
        BinaryOp::Eq => Value::Bool(left == right),
        BinaryOp::Ne => Value::Bool(left != right),
        BinaryOp::Add => match (&left, &right) {
            (Value::Str(_), _) | (_, Value::Str(_)) => Value::Str(format!("{left}{right}")),
            _ => Value::Number(left.as_number(what)? + right.as_number(what)?),
        },
        BinaryOp::Sub => Value::Number(left.as_number(what)? - right.as_number(what)?),
        BinaryOp::Mul => Value::Number(left.as_number(what)? * right.as_number(what)?),
        BinaryOp::Div => Value::Number(left.as_number(what)? / right.as_number(what)?),
        BinaryOp::Rem => Value::Number(left.as_number(what)? % right.as_number(what)?),
        BinaryOp::Lt => Value::Bool(left.as_number(what)? < right.as_number(what)?),
        BinaryOp::Le => Value::Bool(left.as_number(what)? <= right.as_number(what)?),
        BinaryOp::Gt => Value::Bool(left.as_number(what)? > right.as_number(what)?),
        BinaryOp::Ge => Value::Bool(left.as_number(what)? >= right.as_number(what)?),
        BinaryOp::And => {
            if left.truthy() {
                right
            } else {
                left
            }
        }
        BinaryOp::Or => {
            if left.truthy() {
                left
            } else {
                right
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::Compiler;
    use crate::preset::{Handler, HandlerFlow, InstrumentLoader, ListBank, Preset, SongContext};
    use crate::walker::strategy::AnalysisStrategy;
    use assert_approx_eq::assert_approx_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn analyze(source: &str) -> Result<RunReport, WalkerError> {
        let song = Compiler::compile(source).unwrap();
        let catalog = PresetCatalog::default();
        let mut strategy = AnalysisStrategy::new(44_100);
        Scheduler::new(&song.program, &catalog, &mut strategy).run(TrackState::new(60.0))
    }

    /// Records `(command, currentTime)` for every executed command.
    #[derive(Default)]
    struct Log {
        events: RefCell<Vec<(String, f64)>>,
    }

    impl Handler for Log {
        fn name(&self) -> &str {
            "log"
        }

        fn handle(&self, track: &mut TrackState, command: &str) -> Result<HandlerFlow, WalkerError> {
            self.events
                .borrow_mut()
                .push((command.to_string(), track.current_time));
            Ok(HandlerFlow::Continue)
        }
    }

    struct LogLoader(Rc<Log>);

    impl InstrumentLoader for LogLoader {
        fn load(&self, _song: &SongContext, _config: &PresetConfig) -> Result<HandlerRef, WalkerError> {
            Ok(self.0.clone())
        }
    }

    /// A strategy that runs commands through the real dispatch.
    struct Recording;

    impl Strategy for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn song_context(&self) -> SongContext {
            SongContext { sample_rate: 100 }
        }

        fn execute(
            &mut self,
            track: &TrackState,
            command: &str,
            overrides: &[(TrackField, Value)],
        ) -> Result<(), WalkerError> {
            crate::walker::strategy::dispatch(track, command, overrides)
        }

        fn load_preset(
            &mut self,
            preset: &Preset,
            config: &PresetConfig,
        ) -> Result<HandlerRef, WalkerError> {
            preset.instantiate(&self.song_context(), config)
        }
    }

    fn record(source: &str) -> (Result<RunReport, WalkerError>, Vec<(String, f64)>) {
        let log = Rc::new(Log::default());
        let catalog = PresetCatalog::builder()
            .bank(ListBank::new(
                "test",
                vec![Preset::new("Logger", Rc::new(LogLoader(log.clone())))],
            ))
            .build();
        let song = Compiler::compile(source).unwrap();
        let mut strategy = Recording;
        let result =
            Scheduler::new(&song.program, &catalog, &mut strategy).run(TrackState::new(60.0));
        let events = log.events.borrow().clone();
        (result, events)
    }

    #[test]
    fn wait_advances_root() {
        let report = analyze("1 1/2 /4").unwrap();
        assert_approx_eq!(report.root_position, 1.75);
        assert_approx_eq!(report.duration, 1.75);
        assert_eq!(report.tracks, 1);
    }

    #[test]
    fn longest_track_sets_duration() {
        let report = analyze("track a1() { 2 }\ntrack b1() { 1 }\na1();\nb1();").unwrap();
        assert_approx_eq!(report.duration, 2.0);
        assert_eq!(report.root_position, 0.0);
        assert_eq!(report.tracks, 3);
    }

    #[test]
    fn track_duration_ends_procedure_early() {
        let (result, events) = record(
            "loadPreset('Logger');\ntrack riff() { C4 1 D4 1 E4 1 F4 1 }\nriff@2();",
        );
        result.unwrap();
        let commands: Vec<&str> = events.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(commands, vec!["C4", "D4"]);
    }

    #[test]
    fn siblings_interleave_by_time() {
        let (result, events) = record(
            "loadPreset('Logger');\ntrack hi() { A4 1 B4 1 }\ntrack lo() { C4 1/2 D4 1 }\nhi();\nlo();",
        );
        result.unwrap();
        let order: Vec<(&str, f64)> = events.iter().map(|(c, t)| (c.as_str(), *t)).collect();
        assert_eq!(
            order,
            vec![("A4", 0.0), ("C4", 0.0), ("D4", 0.5), ("B4", 1.0)]
        );
    }

    #[test]
    fn awaited_child_blocks_parent() {
        let (result, events) = record(
            "loadPreset('Logger');\ntrack intro() { C4 2 }\nawait intro();\nD4",
        );
        let report = result.unwrap();
        assert_eq!(events[1], ("D4".to_string(), 0.0));
        assert_eq!(report.root_position, 0.0);
    }

    #[test]
    fn awaited_binding_receives_final_state() {
        let (result, events) = record(
            "loadPreset('Logger');\ntrack intro() { 3 }\nconst t = await intro();\ntrack.currentTime = t.currentTime;\nC4",
        );
        result.unwrap();
        assert_eq!(events, vec![("C4".to_string(), 3.0)]);
    }

    #[test]
    fn loops_and_arguments() {
        let (result, events) = record(
            "loadPreset('Logger');\ntrack rep(n) { for (let i = 0; i < n; i++) { C4 1 } }\nrep(3);",
        );
        result.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].1, 2.0);
    }

    #[test]
    fn wait_in_loop_returns_from_track() {
        let (result, events) = record(
            "loadPreset('Logger');\ntrack rep() { while (true) { C4 1 } }\nrep@3();",
        );
        result.unwrap();
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn missing_instrument_fails_root() {
        let (result, _) = record("C4");
        assert_eq!(result, Err(WalkerError::NoInstrument("C4".into())));
    }

    #[test]
    fn unawaited_child_failure_is_contained() {
        let (result, events) = record(
            "track bad() { track.position = -1; }\nbad();\nloadPreset('Logger');\nC4",
        );
        result.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn awaited_child_failure_propagates() {
        let (result, _) = record("track bad() { track.position = -1; }\nawait bad();");
        assert!(matches!(result, Err(WalkerError::TimeReversal { .. })));
    }

    #[test]
    fn missing_preset_is_resolution_error() {
        let (result, _) = record("loadPreset('Nope');");
        assert_eq!(result, Err(WalkerError::PresetNotFound("Nope".into())));
    }

    #[test]
    fn runaway_loop_is_stopped() {
        let song = Compiler::compile("let x = 0;\nwhile (true) { x = x + 1; }").unwrap();
        let catalog = PresetCatalog::default();
        let mut strategy = AnalysisStrategy::new(44_100);
        let result = Scheduler::new(&song.program, &catalog, &mut strategy)
            .with_limits(Limits {
                max_steps: 1_000,
                max_tasks: 10,
            })
            .run(TrackState::new(60.0));
        assert_eq!(result, Err(WalkerError::RunawayTrack("rootTrack".into())));
    }

    #[test]
    fn task_limit() {
        let song = Compiler::compile("track spin() { await spin(); }\nawait spin();").unwrap();
        let catalog = PresetCatalog::default();
        let mut strategy = AnalysisStrategy::new(44_100);
        let result = Scheduler::new(&song.program, &catalog, &mut strategy)
            .with_limits(Limits {
                max_steps: 1_000,
                max_tasks: 3,
            })
            .run(TrackState::new(60.0));
        assert_eq!(result, Err(WalkerError::TooManyTracks(3)));
    }

    #[test]
    fn host_builtins() {
        let report = analyze(
            "const n = parseNote('A4');\nif (n.frequency == 440) { 2 } else { 1 }",
        )
        .unwrap();
        assert_approx_eq!(report.root_position, 2.0);
    }

    #[test]
    fn tempo_change_scales_time() {
        let report = analyze("track.beatsPerMinute = 120;\n4").unwrap();
        assert_approx_eq!(report.duration, 2.0);
        assert_approx_eq!(report.root_position, 4.0);
    }

    #[test]
    fn one_line_branches_assign() {
        let report = analyze(
            "if (true) { track.beatsPerMinute = 120 } else { track.beatsPerMinute = 30 }\n4",
        )
        .unwrap();
        assert_approx_eq!(report.duration, 2.0);
        let report = analyze(
            "if (false) { track.beatsPerMinute = 120 } else { track.beatsPerMinute = 30 }\n4",
        )
        .unwrap();
        assert_approx_eq!(report.duration, 8.0);
    }

    #[test]
    fn undefined_variable() {
        assert_eq!(
            analyze("let y = x + 1;"),
            Err(WalkerError::UndefinedVariable("x".into()))
        );
    }

    #[test]
    fn wakeups_order_by_time_then_spawn() {
        let wake = |time, seq, task| Wakeup { time, seq, task };
        let mut heap = BinaryHeap::new();
        heap.push(wake(1.0, 2, 1));
        heap.push(wake(0.5, 3, 3));
        // A reused slot keeps its later spawn order.
        heap.push(wake(1.0, 1, 2));
        let order: Vec<usize> = std::iter::from_fn(|| heap.pop().map(|w| w.task)).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn ended_task_slots_are_reused() {
        let song = Compiler::compile("track blip() { 1/4 }").unwrap();
        let catalog = PresetCatalog::default();
        let mut strategy = AnalysisStrategy::new(44_100);
        let mut scheduler = Scheduler::new(&song.program, &catalog, &mut strategy);
        let blip = song.program.lookup("blip").unwrap();
        let globals = scheduler.globals.clone();

        let root = scheduler
            .spawn(ROOT_PROCEDURE, TrackState::new(60.0), None, Vec::new(), globals.clone())
            .unwrap();
        let first = scheduler
            .spawn(blip, TrackState::new(60.0), None, Vec::new(), globals.clone())
            .unwrap();
        let task = scheduler.tasks[first].take().unwrap();
        scheduler.finish(task).unwrap();
        let second = scheduler
            .spawn(blip, TrackState::new(60.0), None, Vec::new(), globals)
            .unwrap();

        assert_eq!(root, ROOT_TASK);
        assert_eq!(second, first);
        assert_eq!(scheduler.tasks.len(), 2);
        assert_eq!(scheduler.report.tracks, 3);
        let reused = scheduler.tasks[second].as_ref().unwrap();
        assert_eq!(reused.seq, 2);
    }

    #[test]
    fn sequential_tracks_share_a_slot() {
        let report =
            analyze("track blip() { 1/4 }
for (let i = 0; i < 50; i++) { blip(); 1 }").unwrap();
        assert_eq!(report.tracks, 51);
        assert_approx_eq!(report.duration, 50.0);
    }
}
