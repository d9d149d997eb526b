use std::fmt::Write as _;

use super::value::Value;

// ── Stack opcodes (1-byte op + inline operands) ─────────────────────
//
// Operand widths: `k` = u8 constant index, `s` = u8 stack/upvalue slot,
// `j` = u16 big-endian jump offset, `site` = u16 inline-cache site.

pub(crate) const OP_CONSTANT: u8 = 0; // k
pub(crate) const OP_NIL: u8 = 1;
pub(crate) const OP_TRUE: u8 = 2;
pub(crate) const OP_FALSE: u8 = 3;
pub(crate) const OP_POP: u8 = 4;
pub(crate) const OP_GET_LOCAL: u8 = 5; // s
pub(crate) const OP_SET_LOCAL: u8 = 6; // s
pub(crate) const OP_GET_GLOBAL: u8 = 7; // k
pub(crate) const OP_DEFINE_GLOBAL: u8 = 8; // k
pub(crate) const OP_SET_GLOBAL: u8 = 9; // k
pub(crate) const OP_GET_UPVALUE: u8 = 10; // s
pub(crate) const OP_SET_UPVALUE: u8 = 11; // s
pub(crate) const OP_GET_PROPERTY: u8 = 12; // k site
pub(crate) const OP_SET_PROPERTY: u8 = 13; // k site
pub(crate) const OP_GET_SUPER: u8 = 14; // k
pub(crate) const OP_EQUAL: u8 = 15;
pub(crate) const OP_GREATER: u8 = 16;
pub(crate) const OP_LESS: u8 = 17;
pub(crate) const OP_ADD: u8 = 18;
pub(crate) const OP_SUBTRACT: u8 = 19;
pub(crate) const OP_MULTIPLY: u8 = 20;
pub(crate) const OP_DIVIDE: u8 = 21;
pub(crate) const OP_NOT: u8 = 22;
pub(crate) const OP_NEGATE: u8 = 23;
pub(crate) const OP_PRINT: u8 = 24;
pub(crate) const OP_JUMP: u8 = 25; // j
pub(crate) const OP_JUMP_IF_FALSE: u8 = 26; // j
pub(crate) const OP_LOOP: u8 = 27; // j (backwards)
pub(crate) const OP_CALL: u8 = 28; // argc site
pub(crate) const OP_CLOSURE: u8 = 29; // k, then (is_local, index) per upvalue
pub(crate) const OP_CLOSE_UPVALUE: u8 = 30;
pub(crate) const OP_RETURN: u8 = 31;
pub(crate) const OP_CLASS: u8 = 32; // k
pub(crate) const OP_INHERIT: u8 = 33;
pub(crate) const OP_METHOD: u8 = 34; // k
pub(crate) const OP_GREATER_EQUAL: u8 = 35;
pub(crate) const OP_LESS_EQUAL: u8 = 36;

// ── Chunk ────────────────────────────────────────────────────────────

/// Bytecode for one function plus its constant pool. `lines[i]` is the source
/// line of `code[i]`.
#[derive(Default)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub lines: Vec<u32>,
    pub constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Self {
        Chunk::default()
    }

    pub fn write(&mut self, byte: u8, line: u32) -> usize {
        let idx = self.code.len();
        self.code.push(byte);
        self.lines.push(line);
        idx
    }

    /// Add a constant, reusing an existing slot for equal numbers and strings.
    pub fn add_constant(&mut self, value: Value) -> usize {
        let reusable = matches!(value, Value::Number(_) | Value::String(_));
        if reusable {
            let existing = self.constants.iter().position(|c| match (c, &value) {
                (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
                (Value::String(a), Value::String(b)) => a == b,
                _ => false,
            });
            if let Some(idx) = existing {
                return idx;
            }
        }
        self.constants.push(value);
        self.constants.len() - 1
    }

    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.code[offset], self.code[offset + 1]])
    }

    /// Overwrite the two operand bytes at `offset` with `value`.
    pub fn patch_u16(&mut self, offset: usize, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        self.code[offset] = hi;
        self.code[offset + 1] = lo;
    }

    pub fn line(&self, offset: usize) -> u32 {
        self.lines.get(offset).copied().unwrap_or(0)
    }

    /// Human-readable listing of the whole chunk.
    pub fn disassemble(&self, name: &str) -> String {
        let mut out = format!("== {name} ==\n");
        let mut offset = 0;
        while offset < self.code.len() {
            let (text, next) = self.disassemble_instruction(offset);
            let _ = writeln!(out, "{text}");
            offset = next;
        }
        out
    }

    /// One instruction at `offset`; returns the text and the next offset.
    pub fn disassemble_instruction(&self, offset: usize) -> (String, usize) {
        let op = self.code[offset];
        let line = self.line(offset);
        let prefix = if offset > 0 && self.line(offset - 1) == line {
            format!("{offset:04}    | ")
        } else {
            format!("{offset:04} {line:4} ")
        };

        let constant = |at: usize| -> String {
            let idx = self.code.get(at).copied().unwrap_or(0) as usize;
            match self.constants.get(idx) {
                Some(v) => format!("{idx:4} '{v}'"),
                None => format!("{idx:4} <bad constant>"),
            }
        };

        let (body, next) = match op {
            OP_CONSTANT => (format!("{:<16} {}", "CONSTANT", constant(offset + 1)), offset + 2),
            OP_NIL => ("NIL".to_string(), offset + 1),
            OP_TRUE => ("TRUE".to_string(), offset + 1),
            OP_FALSE => ("FALSE".to_string(), offset + 1),
            OP_POP => ("POP".to_string(), offset + 1),
            OP_GET_LOCAL | OP_SET_LOCAL | OP_GET_UPVALUE | OP_SET_UPVALUE | OP_CALL => {
                let name = match op {
                    OP_GET_LOCAL => "GET_LOCAL",
                    OP_SET_LOCAL => "SET_LOCAL",
                    OP_GET_UPVALUE => "GET_UPVALUE",
                    OP_SET_UPVALUE => "SET_UPVALUE",
                    _ => "CALL",
                };
                let slot = self.code[offset + 1];
                if op == OP_CALL {
                    let site = self.read_u16(offset + 2);
                    (format!("{name:<16} {slot:4} site {site}"), offset + 4)
                } else {
                    (format!("{name:<16} {slot:4}"), offset + 2)
                }
            }
            OP_GET_GLOBAL | OP_DEFINE_GLOBAL | OP_SET_GLOBAL | OP_GET_SUPER | OP_CLASS | OP_METHOD => {
                let name = match op {
                    OP_GET_GLOBAL => "GET_GLOBAL",
                    OP_DEFINE_GLOBAL => "DEFINE_GLOBAL",
                    OP_SET_GLOBAL => "SET_GLOBAL",
                    OP_GET_SUPER => "GET_SUPER",
                    OP_CLASS => "CLASS",
                    _ => "METHOD",
                };
                (format!("{name:<16} {}", constant(offset + 1)), offset + 2)
            }
            OP_GET_PROPERTY | OP_SET_PROPERTY => {
                let name = if op == OP_GET_PROPERTY { "GET_PROPERTY" } else { "SET_PROPERTY" };
                let site = self.read_u16(offset + 2);
                (format!("{name:<16} {} site {site}", constant(offset + 1)), offset + 4)
            }
            OP_EQUAL => ("EQUAL".to_string(), offset + 1),
            OP_GREATER => ("GREATER".to_string(), offset + 1),
            OP_LESS => ("LESS".to_string(), offset + 1),
            OP_GREATER_EQUAL => ("GREATER_EQUAL".to_string(), offset + 1),
            OP_LESS_EQUAL => ("LESS_EQUAL".to_string(), offset + 1),
            OP_ADD => ("ADD".to_string(), offset + 1),
            OP_SUBTRACT => ("SUBTRACT".to_string(), offset + 1),
            OP_MULTIPLY => ("MULTIPLY".to_string(), offset + 1),
            OP_DIVIDE => ("DIVIDE".to_string(), offset + 1),
            OP_NOT => ("NOT".to_string(), offset + 1),
            OP_NEGATE => ("NEGATE".to_string(), offset + 1),
            OP_PRINT => ("PRINT".to_string(), offset + 1),
            OP_JUMP | OP_JUMP_IF_FALSE | OP_LOOP => {
                let jump = self.read_u16(offset + 1) as isize;
                let (name, target) = match op {
                    OP_JUMP => ("JUMP", offset as isize + 3 + jump),
                    OP_JUMP_IF_FALSE => ("JUMP_IF_FALSE", offset as isize + 3 + jump),
                    _ => ("LOOP", offset as isize + 3 - jump),
                };
                (format!("{name:<16} {offset:4} -> {target}"), offset + 3)
            }
            OP_CLOSURE => {
                let idx = self.code[offset + 1] as usize;
                let mut text = format!("{:<16} {}", "CLOSURE", constant(offset + 1));
                let mut next = offset + 2;
                if let Some(Value::Function(function)) = self.constants.get(idx) {
                    for _ in 0..function.upvalue_count {
                        let kind = if self.code[next] == 1 { "local" } else { "upvalue" };
                        let _ = write!(text, "\n{next:04}    |                     {kind} {}", self.code[next + 1]);
                        next += 2;
                    }
                }
                (text, next)
            }
            OP_CLOSE_UPVALUE => ("CLOSE_UPVALUE".to_string(), offset + 1),
            OP_RETURN => ("RETURN".to_string(), offset + 1),
            OP_INHERIT => ("INHERIT".to_string(), offset + 1),
            other => (format!("Unknown opcode {other}"), offset + 1),
        };
        (format!("{prefix}{body}"), next)
    }
}
