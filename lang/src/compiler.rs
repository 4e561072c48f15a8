//! Parser/compiler: source text to a tree of functions, each holding a
//! flat opcode program with resolved branch targets.
//!
//! Compilation is a single pass with fix-up stacks for `for` and `if`
//! nesting. `break` and `continue` record the enclosing `ForInit` index
//! and are dereferenced through it at runtime, so their jump targets
//! become valid once the matching `endfor` has been compiled. After the
//! whole tree is built, a second pass rewrites every identifier to its
//! scoped cell name.
//!
//! Errors accumulate and never abort compilation; a program that carries
//! errors must not be executed.

use crate::builtins::Builtin;
use crate::expr::{self, Expr};
use crate::lexer::tokenize_line;
use crate::token::{Token, TokenKind};
use std::collections::HashMap;
use tracing::debug;

pub type FuncId = usize;

/// Name of the implicit top-level function.
pub const MAIN: &str = "__main__";

/// Opcode commands: control flow or a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ForInit,
    ForLoop,
    ForEnd,
    If,
    Else,
    EndIf,
    Return,
    Break,
    Continue,
    Expression,
    CallBuiltin(Builtin),
    CallUser(FuncId),
}

/// One unit of execution.
#[derive(Debug, Clone)]
pub struct Opcode {
    pub command: Command,
    pub args: Vec<Expr>,
    /// 1-based source line
    pub line: usize,
    /// Resolved branch index, where the command uses one
    pub target: Option<usize>,
}

/// A compiled function: `__main__` or a user `proc`.
#[derive(Debug, Clone)]
pub struct Func {
    pub name: String,
    pub parent: Option<FuncId>,
    pub params: Vec<String>,
    /// Declared variables in declaration order; parameters first.
    pub locals: Vec<String>,
    pub code: Vec<Opcode>,
    pub children: HashMap<String, FuncId>,
}

impl Func {
    /// Scoped cell name for a variable this function declares.
    pub fn cell(&self, name: &str) -> String {
        format!("{}_{}", self.name, name)
    }
}

/// Compilation result: the function arena plus accumulated errors.
#[derive(Debug)]
pub struct Program {
    pub funcs: Vec<Func>,
    pub main: FuncId,
    pub errors: Vec<String>,
}

impl Program {
    pub fn func(&self, id: FuncId) -> &Func {
        &self.funcs[id]
    }
}

/// Compile a script. `\r` and `\t` fold to spaces before lexing.
pub fn compile(source: &str) -> Program {
    let cleaned: String = source
        .chars()
        .map(|c| if c == '\r' || c == '\t' { ' ' } else { c })
        .collect();
    let lines: Vec<Vec<Token>> = cleaned.split('\n').map(tokenize_line).collect();

    let mut compiler = Compiler {
        lines,
        funcs: Vec::new(),
        errors: Vec::new(),
    };
    let main = compiler.new_func(None, MAIN.to_string(), Vec::new());
    compiler.compile_function(main, 0);
    compiler.resolve_identifiers();
    debug!(
        functions = compiler.funcs.len(),
        errors = compiler.errors.len(),
        "compilation finished"
    );

    Program {
        funcs: compiler.funcs,
        main,
        errors: compiler.errors,
    }
}

struct Compiler {
    lines: Vec<Vec<Token>>,
    funcs: Vec<Func>,
    errors: Vec<String>,
}

impl Compiler {
    fn new_func(&mut self, parent: Option<FuncId>, name: String, params: Vec<String>) -> FuncId {
        let id = self.funcs.len();
        self.funcs.push(Func {
            name,
            parent,
            locals: params.clone(),
            params,
            code: Vec::new(),
            children: HashMap::new(),
        });
        id
    }

    fn syntax_error(&mut self, lineno: usize) {
        self.errors.push(format!("Syntax error in line {lineno}"));
    }

    fn emit(&mut self, func: FuncId, op: Opcode) -> usize {
        let idx = self.funcs[func].code.len();
        self.funcs[func].code.push(op);
        idx
    }

    /// Compile lines into `func` starting at `start`. Returns the index of
    /// the line following the terminating `endproc` (or the end of input).
    fn compile_function(&mut self, func: FuncId, start: usize) -> usize {
        let mut for_stack: Vec<usize> = Vec::new();
        let mut if_stack: Vec<usize> = Vec::new();
        let mut line_idx = start;

        while line_idx < self.lines.len() {
            let lineno = line_idx + 1;
            let tokens = self.lines[line_idx].clone();
            if tokens.is_empty() {
                line_idx += 1;
                continue;
            }

            if tokens[0].kind != TokenKind::Id {
                self.syntax_error(lineno);
                line_idx += 1;
                continue;
            }

            match tokens[0].body.as_str() {
                "endproc" => {
                    self.report_unclosed(func, &for_stack, &if_stack);
                    if self.funcs[func].parent.is_none() {
                        self.syntax_error(lineno);
                        line_idx += 1;
                        continue;
                    }
                    return line_idx + 1;
                }
                "endfor" => {
                    match for_stack.pop() {
                        Some(for_init) => {
                            let loop_end = self.funcs[func].code.len();
                            self.funcs[func].code[for_init].target = Some(loop_end);
                            self.funcs[func].code[for_init + 1].target = Some(loop_end);
                            self.emit(
                                func,
                                Opcode {
                                    command: Command::ForEnd,
                                    args: Vec::new(),
                                    line: lineno,
                                    target: Some(for_init + 1),
                                },
                            );
                        }
                        None => self.syntax_error(lineno),
                    }
                }
                "else" => match if_stack.pop() {
                    Some(pending) => {
                        let here = self.funcs[func].code.len();
                        self.funcs[func].code[pending].target = Some(here);
                        let else_idx = self.emit(
                            func,
                            Opcode {
                                command: Command::Else,
                                args: Vec::new(),
                                line: lineno,
                                target: None,
                            },
                        );
                        if_stack.push(else_idx);
                    }
                    None => self.syntax_error(lineno),
                },
                "endif" => match if_stack.pop() {
                    Some(pending) => {
                        let here = self.funcs[func].code.len();
                        self.funcs[func].code[pending].target = Some(here);
                        self.emit(
                            func,
                            Opcode {
                                command: Command::EndIf,
                                args: Vec::new(),
                                line: lineno,
                                target: None,
                            },
                        );
                    }
                    None => self.syntax_error(lineno),
                },
                "break" | "continue" => match for_stack.last() {
                    Some(&for_init) => {
                        let command = if tokens[0].body == "break" {
                            Command::Break
                        } else {
                            Command::Continue
                        };
                        self.emit(
                            func,
                            Opcode {
                                command,
                                args: Vec::new(),
                                line: lineno,
                                target: Some(for_init),
                            },
                        );
                    }
                    None => self.syntax_error(lineno),
                },
                "return" => {
                    self.emit(
                        func,
                        Opcode {
                            command: Command::Return,
                            args: Vec::new(),
                            line: lineno,
                            target: None,
                        },
                    );
                }
                "for" => {
                    let parts = split_arguments(&tokens[1..]);
                    if parts.len() < 2 || parts.len() > 3 {
                        self.syntax_error(lineno);
                    } else if let Some(args) = self.parse_parts(func, &parts, lineno) {
                        let for_init = self.funcs[func].code.len();
                        let loop_args: Vec<Expr> = args[1..].to_vec();
                        self.emit(
                            func,
                            Opcode {
                                command: Command::ForInit,
                                args,
                                line: lineno,
                                target: None,
                            },
                        );
                        self.emit(
                            func,
                            Opcode {
                                command: Command::ForLoop,
                                args: loop_args,
                                line: lineno,
                                target: None,
                            },
                        );
                        for_stack.push(for_init);
                    }
                }
                "if" => {
                    let parts = split_arguments(&tokens[1..]);
                    if parts.is_empty() || parts.len() > 2 {
                        self.syntax_error(lineno);
                    } else if let Some(args) = self.parse_parts(func, &parts, lineno) {
                        let if_idx = self.emit(
                            func,
                            Opcode {
                                command: Command::If,
                                args,
                                line: lineno,
                                target: None,
                            },
                        );
                        if_stack.push(if_idx);
                    }
                }
                "proc" => {
                    if tokens.len() < 2
                        || tokens[1].kind != TokenKind::Id
                        || tokens[2..].iter().any(|t| t.kind != TokenKind::Id)
                    {
                        self.syntax_error(lineno);
                        line_idx += 1;
                        continue;
                    }
                    let name = tokens[1].body.clone();
                    let params: Vec<String> = tokens[2..].iter().map(|t| t.body.clone()).collect();
                    let child = self.new_func(Some(func), name.clone(), params);
                    self.funcs[func].children.insert(name, child);
                    line_idx = self.compile_function(child, line_idx + 1);
                    continue;
                }
                name => self.compile_call_or_expression(func, name, &tokens, lineno),
            }
            line_idx += 1;
        }

        // Ran off the end of the source.
        self.report_unclosed(func, &for_stack, &if_stack);
        if self.funcs[func].parent.is_some() {
            self.syntax_error(self.lines.len().max(1));
        }
        self.lines.len()
    }

    /// Builtin call, user call, or a bare expression statement.
    fn compile_call_or_expression(
        &mut self,
        func: FuncId,
        name: &str,
        tokens: &[Token],
        lineno: usize,
    ) {
        if let Some(builtin) = Builtin::from_name(name) {
            let parts = if tokens.len() == 1 {
                Vec::new()
            } else {
                split_arguments(&tokens[1..])
            };
            if parts.len() != builtin.arity() {
                self.errors
                    .push(format!("Wrong number of arguments in line {lineno}"));
                return;
            }
            if let Some(args) = self.parse_parts(func, &parts, lineno) {
                self.emit(
                    func,
                    Opcode {
                        command: Command::CallBuiltin(builtin),
                        args,
                        line: lineno,
                        target: None,
                    },
                );
            }
            return;
        }

        // `<id> <operator...>` is an expression statement.
        if tokens.len() >= 2
            && tokens[1].kind == TokenKind::Expression
            && tokens[1]
                .body
                .starts_with(['=', '+', '-', '*', '/', '%', '&', '|', '^', '<', '>', '!'])
        {
            self.declare_assignment(func, tokens);
            match expr::parse(tokens) {
                Ok(parsed) => {
                    self.emit(
                        func,
                        Opcode {
                            command: Command::Expression,
                            args: vec![parsed],
                            line: lineno,
                            target: None,
                        },
                    );
                }
                Err(_) => self.syntax_error(lineno),
            }
            return;
        }

        // User function call, resolved up the lexical chain.
        if let Some(callee) = self.resolve_user_func(func, name) {
            let parts = if tokens.len() == 1 {
                Vec::new()
            } else {
                split_arguments(&tokens[1..])
            };
            if parts.len() != self.funcs[callee].params.len() {
                self.errors
                    .push(format!("Wrong number of arguments in line {lineno}"));
                return;
            }
            if let Some(args) = self.parse_parts(func, &parts, lineno) {
                self.emit(
                    func,
                    Opcode {
                        command: Command::CallUser(callee),
                        args,
                        line: lineno,
                        target: None,
                    },
                );
            }
            return;
        }

        self.errors
            .push(format!("Unknown command in line {lineno}"));
    }

    /// Parse each argument token run; `None` (plus an accumulated syntax
    /// error) if any fails.
    fn parse_parts(
        &mut self,
        func: FuncId,
        parts: &[Vec<Token>],
        lineno: usize,
    ) -> Option<Vec<Expr>> {
        let mut args = Vec::with_capacity(parts.len());
        for part in parts {
            self.declare_assignment(func, part);
            match expr::parse(part) {
                Ok(parsed) => args.push(parsed),
                Err(_) => {
                    self.syntax_error(lineno);
                    return None;
                }
            }
        }
        Some(args)
    }

    /// Leading `<id> =` declares the identifier as a local of the current
    /// function when no enclosing function already owns it. Identifiers
    /// starting with `_` are globals and never declared here.
    fn declare_assignment(&mut self, func: FuncId, tokens: &[Token]) {
        if tokens.len() < 2 || tokens[0].kind != TokenKind::Id {
            return;
        }
        let body = &tokens[1].body;
        if tokens[1].kind != TokenKind::Expression
            || !body.starts_with('=')
            || body.starts_with("==")
        {
            return;
        }
        let name = &tokens[0].body;
        if name.starts_with('_')
            || matches!(
                name.as_str(),
                "measured_value" | "true" | "false" | "null" | "undefined" | "this"
            )
        {
            return;
        }
        let mut cur = Some(func);
        while let Some(f) = cur {
            if self.funcs[f].locals.iter().any(|l| l == name) {
                return;
            }
            cur = self.funcs[f].parent;
        }
        self.funcs[func].locals.push(name.clone());
    }

    fn resolve_user_func(&self, func: FuncId, name: &str) -> Option<FuncId> {
        let mut cur = Some(func);
        while let Some(f) = cur {
            if let Some(&child) = self.funcs[f].children.get(name) {
                return Some(child);
            }
            cur = self.funcs[f].parent;
        }
        None
    }

    fn report_unclosed(&mut self, func: FuncId, for_stack: &[usize], if_stack: &[usize]) {
        let lines: Vec<usize> = for_stack
            .iter()
            .chain(if_stack.iter())
            .map(|&idx| self.funcs[func].code[idx].line)
            .collect();
        for lineno in lines {
            self.syntax_error(lineno);
        }
    }

    /// Rewrite every identifier in every expression to its scoped cell
    /// name, now that all declarations are known.
    fn resolve_identifiers(&mut self) {
        for fid in 0..self.funcs.len() {
            let mut code = std::mem::take(&mut self.funcs[fid].code);
            for op in &mut code {
                for arg in &mut op.args {
                    arg.for_each_ident_mut(&mut |name| {
                        *name = self.resolve_cell(fid, name);
                    });
                }
            }
            self.funcs[fid].code = code;
        }
    }

    fn resolve_cell(&self, func: FuncId, name: &str) -> String {
        if name.starts_with('_') {
            return format!("_{name}");
        }
        let mut cur = Some(func);
        while let Some(f) = cur {
            if self.funcs[f].locals.iter().any(|l| l == name) {
                return self.funcs[f].cell(name);
            }
            cur = self.funcs[f].parent;
        }
        // Never declared: left raw, faults on read.
        name.to_string()
    }
}

/// Split a token run into argument lists at top-level `,`/`;`, counting
/// parenthesis depth inside expression bodies.
pub fn split_arguments(tokens: &[Token]) -> Vec<Vec<Token>> {
    let mut parts: Vec<Vec<Token>> = vec![Vec::new()];
    let mut depth = 0i32;
    for token in tokens {
        if token.kind == TokenKind::Separator && depth == 0 {
            parts.push(Vec::new());
            continue;
        }
        if token.kind == TokenKind::Expression && !token.body.starts_with('"') {
            for c in token.body.chars() {
                if c == '(' {
                    depth += 1;
                } else if c == ')' {
                    depth -= 1;
                }
            }
        }
        parts.last_mut().expect("parts is never empty").push(token.clone());
    }
    parts
}
