//! Code generation: token stream → listing + executable program.
//!
//! Each typed token becomes a [`Statement`]. A statement renders as a line of
//! the procedural listing and lowers to instructions of the procedure that
//! encloses it. Braces in literal runs give the block structure: a track
//! header opens a new procedure, a control header opens a jump-guarded block.

use std::fmt;

use super::error::CompileError;
use super::grammar::anchored;
use super::host::{self, ControlHeader};
use super::overrides::{
    format_duration, format_overrides, parse_overrides, Override, COMMAND_ALIASES, TRACK_ALIASES,
};
use super::program::{Binding, Expr, HostStmt, Instr, Place, Program, ROOT_PROCEDURE};
use super::token::{SpannedToken, Token, TokenKind};
use crate::walker::state::FieldRef;

/// Names that are never rewritten into commands or track calls.
pub const RESERVED: &[&str] = &["wait", "loadPreset", "execute", "executeCallback", "parseNote"];

const ROOT_TRACK: &str = "rootTrack";
const ROOT_EXPORTS: &str = "{wait, execute, executeCallback, loadPreset, rootTrackState:track}";

/// Wrap a generated body in the root track template.
pub fn wrap_root(body: &str) -> String {
    format!("(async function {ROOT_TRACK}({ROOT_EXPORTS}) {{\n{body}}})")
}

/// One generated statement, tagged by the rule that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Literal(String),
    Comment(String),
    Control {
        text: String,
        header: ControlHeader,
    },
    Assignment {
        text: String,
        stmt: HostStmt,
    },
    /// A call to a runtime primitive, kept verbatim.
    Reserved {
        text: String,
        stmt: HostStmt,
        awaited: bool,
    },
    Execute {
        command: String,
        overrides: Vec<Override>,
    },
    Wait {
        duration: String,
    },
    TrackDefinition {
        name: String,
        params_text: String,
        params: Vec<String>,
    },
    Callback {
        binding_text: String,
        binding: Option<Binding>,
        awaited: bool,
        target: String,
        overrides: Vec<Override>,
        args_text: String,
        args: Vec<Expr>,
    },
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Literal(text)
            | Statement::Comment(text)
            | Statement::Control { text, .. }
            | Statement::Assignment { text, .. }
            | Statement::Reserved { text, .. } => f.write_str(text),
            Statement::Execute { command, overrides } if overrides.is_empty() => {
                write!(f, "execute(track, \"{command}\");")
            }
            Statement::Execute { command, overrides } => write!(
                f,
                "execute(track, \"{command}\", {});",
                format_overrides(overrides)
            ),
            Statement::Wait { duration } => write!(f, "if(await wait(track, {duration})) return;"),
            Statement::TrackDefinition {
                name, params_text, ..
            } => write!(
                f,
                "async function {name}({params_text}){{\n\tconst track = {{...this.parent, ...this.overrides, position:0}};"
            ),
            Statement::Callback {
                binding_text,
                awaited,
                target,
                overrides,
                args_text,
                ..
            } => {
                let await_text = if *awaited { "await " } else { "" };
                let args = if args_text.trim().is_empty() {
                    String::new()
                } else {
                    format!(", {args_text}")
                };
                write!(
                    f,
                    "{binding_text}{await_text}executeCallback(track, {target}, {}{args});",
                    format_overrides(overrides)
                )
            }
        }
    }
}

fn invalid(what: &str, text: &str) -> CompileError {
    CompileError::unlocated(format!("invalid {what}: '{text}'"))
}

/// Build the statement for one token. Errors carry no location yet.
pub fn statement_for(token: &Token) -> Result<Statement, CompileError> {
    let Token::Typed { kind, content } = token else {
        return Ok(Statement::Literal(token.source()));
    };
    let text = content.source();
    match kind {
        TokenKind::Comment => Ok(Statement::Comment(text)),
        TokenKind::ControlHeader => {
            let caps = anchored::CONTROL_HEADER
                .captures(&text)
                .ok_or_else(|| invalid("control header", &text))?;
            let header = match caps.name("keyword") {
                Some(keyword) => host::parse_control(
                    keyword.as_str(),
                    caps.name("header").map_or("", |m| m.as_str()),
                )?,
                None => ControlHeader::Else,
            };
            Ok(Statement::Control { text, header })
        }
        TokenKind::Assignment => {
            let stmt = host::parse_statement(&text)?;
            Ok(Statement::Assignment { text, stmt })
        }
        TokenKind::FunctionDefinition => Err(CompileError::unlocated(format!(
            "only track procedures can be defined: '{}'",
            text.trim_end_matches('{').trim()
        ))),
        TokenKind::Command => {
            let caps = anchored::COMMAND
                .captures(&text)
                .ok_or_else(|| invalid("command statement", &text))?;
            let command = caps["command"].to_string();
            if RESERVED.contains(&command.as_str()) {
                let stmt = host::parse_statement(&text)?;
                return Ok(Statement::Reserved {
                    text,
                    stmt,
                    awaited: false,
                });
            }
            let overrides = parse_overrides(&caps["overrides"], &COMMAND_ALIASES)
                .ok_or_else(|| invalid("command override", &text))?;
            Ok(Statement::Execute { command, overrides })
        }
        TokenKind::Wait => {
            let caps = anchored::WAIT
                .captures(&text)
                .ok_or_else(|| invalid("wait statement", &text))?;
            Ok(Statement::Wait {
                duration: format_duration(&caps["duration"]),
            })
        }
        TokenKind::TrackDefinition => {
            let caps = anchored::TRACK_DEFINITION
                .captures(&text)
                .ok_or_else(|| invalid("track definition", &text))?;
            let params_text = caps["args"].to_string();
            Ok(Statement::TrackDefinition {
                name: caps["name"].to_string(),
                params: host::parse_params(&params_text)?,
                params_text,
            })
        }
        TokenKind::FunctionCall => {
            let caps = anchored::FUNCTION_CALL
                .captures(&text)
                .ok_or_else(|| invalid("function statement", &text))?;
            let awaited = caps.name("await").is_some();
            let target = caps["name"].to_string();
            if RESERVED.contains(&target.as_str()) {
                let stmt = host::parse_statement(&text)?;
                return Ok(Statement::Reserved {
                    text,
                    stmt,
                    awaited,
                });
            }
            let binding_text = caps.name("assign").map_or("", |m| m.as_str()).to_string();
            let binding = if binding_text.is_empty() {
                None
            } else {
                Some(host::parse_binding(&binding_text)?)
            };
            let overrides = parse_overrides(&caps["overrides"], &TRACK_ALIASES)
                .ok_or_else(|| invalid("track override", &text))?;
            let args_text = caps["args"].to_string();
            Ok(Statement::Callback {
                binding_text,
                binding,
                awaited,
                target,
                overrides,
                args: host::parse_arguments(&args_text)?,
                args_text,
            })
        }
    }
}

/// Generate the listing body and the executable program.
pub fn generate(source: &str, tokens: &[SpannedToken]) -> Result<(String, Program), CompileError> {
    let mut body = String::new();
    let mut asm = Assembler::new(source);
    for (idx, spanned) in tokens.iter().enumerate() {
        let at = |e: CompileError| match e.token_index {
            Some(_) => e,
            None => e.located(idx, source, spanned.offset),
        };
        let stmt = statement_for(&spanned.token).map_err(at)?;
        body.push_str(&stmt.to_string());
        asm.feed(idx, spanned.offset, stmt).map_err(at)?;
    }
    let program = asm.finish()?;
    Ok((body, program))
}

enum BlockKind {
    Track,
    Plain,
    /// `skip` jumps past the branch; `exits` jump past the whole chain.
    Branch {
        skip: Option<usize>,
        exits: Vec<usize>,
    },
    Loop {
        cond_pc: usize,
        skip: Option<usize>,
        step: Option<HostStmt>,
    },
}

struct Block {
    kind: BlockKind,
    /// Procedure the block's instructions go to.
    proc: usize,
    token_index: usize,
    offset: usize,
}

struct PendingControl {
    header: ControlHeader,
    /// Exit jumps of the chain this `else` continues.
    exits: Vec<usize>,
}

struct Assembler<'s> {
    source: &'s str,
    program: Program,
    blocks: Vec<Block>,
    pending: Option<PendingControl>,
    /// Exit jumps of the `if` chain that just closed, while an `else` may follow.
    open_chain: Option<Vec<usize>>,
    calls: Vec<(String, usize, usize)>,
}

impl<'s> Assembler<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            program: Program::new(),
            blocks: Vec::new(),
            pending: None,
            open_chain: None,
            calls: Vec::new(),
        }
    }

    fn current_proc(&self) -> usize {
        self.blocks.last().map_or(ROOT_PROCEDURE, |b| b.proc)
    }

    fn emit(&mut self, instr: Instr) -> usize {
        let proc = self.current_proc();
        let body = &mut self.program.procedures[proc].body;
        body.push(instr);
        body.len() - 1
    }

    fn next_pc(&self) -> usize {
        self.program.procedures[self.current_proc()].body.len()
    }

    fn patch(&mut self, at: usize, target: usize) {
        let proc = self.current_proc();
        match &mut self.program.procedures[proc].body[at] {
            Instr::JumpUnless { target: t, .. } | Instr::Jump(t) => *t = target,
            _ => {}
        }
    }

    fn feed(&mut self, idx: usize, offset: usize, stmt: Statement) -> Result<(), CompileError> {
        match stmt {
            Statement::Literal(text) => {
                for (i, ch) in text.char_indices() {
                    match ch {
                        c if c.is_whitespace() => {}
                        '{' => self.open_block(idx, offset + i)?,
                        '}' => self.close_block(idx, offset + i)?,
                        ';' => self.statement_boundary()?,
                        // Text no rule matched cannot pass through.
                        other => {
                            return Err(CompileError::lex(format!("unexpected '{other}'"), 0, 0)
                                .located(idx, self.source, offset + i))
                        }
                    }
                }
                Ok(())
            }
            Statement::Comment(_) => Ok(()),
            Statement::Control { header, .. } => {
                if self.pending.is_some() {
                    return Err(CompileError::unlocated("expected '{' after control header"));
                }
                let exits = match header {
                    ControlHeader::ElseIf(_) | ControlHeader::Else => self
                        .open_chain
                        .take()
                        .ok_or_else(|| CompileError::unlocated("'else' without a preceding 'if' block"))?,
                    _ => {
                        self.open_chain = None;
                        Vec::new()
                    }
                };
                self.pending = Some(PendingControl { header, exits });
                Ok(())
            }
            other => {
                self.statement_boundary()?;
                self.lower(idx, offset, other)
            }
        }
    }

    /// Anything but whitespace and comments ends an `if` chain and must not
    /// sit between a control header and its block.
    fn statement_boundary(&mut self) -> Result<(), CompileError> {
        if self.pending.is_some() {
            return Err(CompileError::unlocated("expected '{' after control header"));
        }
        self.open_chain = None;
        Ok(())
    }

    fn lower(&mut self, idx: usize, offset: usize, stmt: Statement) -> Result<(), CompileError> {
        match stmt {
            Statement::Assignment { stmt, .. } => {
                reject_nested_primitives(&stmt)?;
                self.emit(Instr::Host(stmt));
            }
            Statement::Reserved { stmt, awaited, .. } => {
                let instr = lower_reserved(stmt, awaited)?;
                if let Instr::Call { target, .. } = &instr {
                    self.calls.push((target.clone(), idx, offset));
                }
                self.emit(instr);
            }
            Statement::Execute { command, overrides } => {
                let overrides = overrides
                    .into_iter()
                    .map(|o| Ok((o.field, host::parse_expression(&o.value)?)))
                    .collect::<Result<_, CompileError>>()?;
                self.emit(Instr::Execute { command, overrides });
            }
            Statement::Wait { duration } => {
                let duration = host::parse_expression(&duration)?;
                self.emit(Instr::Wait {
                    duration,
                    guarded: true,
                });
            }
            Statement::TrackDefinition { name, params, .. } => {
                let proc = self
                    .program
                    .define(&name, params)
                    .ok_or_else(|| CompileError::unlocated(format!("duplicate track '{name}'")))?;
                self.blocks.push(Block {
                    kind: BlockKind::Track,
                    proc,
                    token_index: idx,
                    offset,
                });
            }
            Statement::Callback {
                binding,
                awaited,
                target,
                overrides,
                args,
                ..
            } => {
                let overrides = overrides
                    .into_iter()
                    .map(|o| Ok((FieldRef::Field(o.field), host::parse_expression(&o.value)?)))
                    .collect::<Result<_, CompileError>>()?;
                self.calls.push((target.clone(), idx, offset));
                self.emit(Instr::Call {
                    target,
                    overrides,
                    args,
                    awaited,
                    binding,
                });
            }
            Statement::Literal(_) | Statement::Comment(_) | Statement::Control { .. } => {}
        }
        Ok(())
    }

    fn open_block(&mut self, idx: usize, offset: usize) -> Result<(), CompileError> {
        let proc = self.current_proc();
        let kind = match self.pending.take() {
            None => {
                self.open_chain = None;
                BlockKind::Plain
            }
            Some(PendingControl { header, exits }) => match header {
                ControlHeader::If(cond) | ControlHeader::ElseIf(cond) => {
                    let skip = self.emit(Instr::JumpUnless { cond, target: 0 });
                    BlockKind::Branch {
                        skip: Some(skip),
                        exits,
                    }
                }
                ControlHeader::Else => BlockKind::Branch { skip: None, exits },
                ControlHeader::While(cond) => {
                    let cond_pc = self.next_pc();
                    let skip = self.emit(Instr::JumpUnless { cond, target: 0 });
                    BlockKind::Loop {
                        cond_pc,
                        skip: Some(skip),
                        step: None,
                    }
                }
                ControlHeader::For { init, cond, step } => {
                    if let Some(init) = init {
                        self.emit(Instr::Host(init));
                    }
                    let cond_pc = self.next_pc();
                    let skip = cond.map(|cond| self.emit(Instr::JumpUnless { cond, target: 0 }));
                    BlockKind::Loop {
                        cond_pc,
                        skip,
                        step,
                    }
                }
            },
        };
        self.blocks.push(Block {
            kind,
            proc,
            token_index: idx,
            offset,
        });
        Ok(())
    }

    fn close_block(&mut self, idx: usize, offset: usize) -> Result<(), CompileError> {
        if self.pending.is_some() {
            return Err(CompileError::unlocated("expected '{' after control header"));
        }
        let Some(block) = self.blocks.pop() else {
            return Err(CompileError::unlocated("unmatched '}'").located(idx, self.source, offset));
        };
        let mut chain = None;
        match block.kind {
            BlockKind::Track | BlockKind::Plain => {}
            BlockKind::Branch { skip, mut exits } => {
                if let Some(skip) = skip {
                    exits.push(self.emit(Instr::Jump(0)));
                    let end = self.next_pc();
                    self.patch(skip, end);
                }
                let end = self.next_pc();
                for &exit in &exits {
                    self.patch(exit, end);
                }
                // An `else` block ends the chain.
                if skip.is_some() {
                    chain = Some(exits);
                }
            }
            BlockKind::Loop {
                cond_pc,
                skip,
                step,
            } => {
                if let Some(step) = step {
                    self.emit(Instr::Host(step));
                }
                self.emit(Instr::Jump(cond_pc));
                if let Some(skip) = skip {
                    let end = self.next_pc();
                    self.patch(skip, end);
                }
            }
        }
        self.open_chain = chain;
        Ok(())
    }

    fn finish(self) -> Result<Program, CompileError> {
        if let Some(block) = self.blocks.last() {
            return Err(CompileError::unlocated("unclosed '{'").located(
                block.token_index,
                self.source,
                block.offset,
            ));
        }
        if self.pending.is_some() {
            return Err(CompileError::unlocated("control header without a block").located(
                0,
                self.source,
                self.source.len(),
            ));
        }
        for (target, idx, offset) in &self.calls {
            if self.program.lookup(target).is_none() {
                return Err(CompileError::unlocated(format!("unknown track '{target}'")).located(
                    *idx,
                    self.source,
                    *offset,
                ));
            }
        }
        Ok(self.program)
    }
}

/// Primitives that suspend or spawn can only be whole statements.
fn reject_nested_primitives(stmt: &HostStmt) -> Result<(), CompileError> {
    for primitive in ["wait", "executeCallback"] {
        if stmt.calls(primitive) {
            return Err(CompileError::unlocated(format!(
                "{primitive}() can only be used as a statement"
            )));
        }
    }
    Ok(())
}

/// Lower a verbatim primitive call.
fn lower_reserved(stmt: HostStmt, awaited: bool) -> Result<Instr, CompileError> {
    match stmt {
        HostStmt::Eval(Expr::Call { name, args }) if name == "wait" => {
            let duration = match args.as_slice() {
                [Expr::Var(track), duration] if track == "track" => duration.clone(),
                [duration] => duration.clone(),
                _ => return Err(CompileError::unlocated("wait() takes (track, duration)")),
            };
            Ok(Instr::Wait {
                duration,
                guarded: false,
            })
        }
        HostStmt::Eval(Expr::Call { name, args }) if name == "executeCallback" => {
            lower_execute_callback(args, awaited, None)
        }
        HostStmt::Declare {
            name: var,
            value: Expr::Call { name, args },
        } if name == "executeCallback" => lower_execute_callback(
            args,
            awaited,
            Some(Binding {
                declare: true,
                place: Place::Var(var),
            }),
        ),
        HostStmt::Assign {
            place,
            op: super::program::AssignOp::Set,
            value: Expr::Call { name, args },
        } if name == "executeCallback" => lower_execute_callback(
            args,
            awaited,
            Some(Binding {
                declare: false,
                place,
            }),
        ),
        other => {
            reject_nested_primitives(&other)?;
            Ok(Instr::Host(other))
        }
    }
}

/// `executeCallback(track, name, {overrides}, ...args)`
fn lower_execute_callback(
    args: Vec<Expr>,
    awaited: bool,
    binding: Option<Binding>,
) -> Result<Instr, CompileError> {
    let mut args = args.into_iter();
    let usage = || CompileError::unlocated("executeCallback() takes (track, trackName, {overrides}, ...args)");
    match args.next() {
        Some(Expr::Var(track)) if track == "track" => {}
        _ => return Err(usage()),
    }
    let Some(Expr::Var(target)) = args.next() else {
        return Err(usage());
    };
    let overrides = match args.next() {
        Some(Expr::Object(entries)) => entries
            .into_iter()
            .map(|(key, value)| (FieldRef::from_name(&key), value))
            .collect(),
        Some(Expr::Undefined) | None => Vec::new(),
        Some(_) => return Err(usage()),
    };
    Ok(Instr::Call {
        target,
        overrides,
        args: args.collect(),
        awaited,
        binding,
    })
}
