use std::fs;
use std::io::ErrorKind;

use regex::{Captures, Regex};
use thiserror::Error;

use crate::cpu::RegisterFile;
use crate::instructions::instructions::{get_opcode, Instr, Operand, Program, SourceLocation, Word};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("{0}")]
    ParseError(String),

    #[error("{0}")]
    NotFoundError(String),

    #[error("{0}")]
    IOError(String),
}

const REGISTER_NAME: &str = r"[A-Za-z_][A-Za-z0-9_]*";

#[derive(Clone, Copy, PartialEq, Debug)]
enum Section {
    Registers,
    Text,
}

struct Loader {
    instr_re: Regex,
    reg_init_re: Regex,
    register_re: Regex,
    section: Section,
    code: Vec<Instr>,
    registers: RegisterFile,
}

impl Loader {
    fn new() -> Result<Loader, LoadError> {
        let instr_re = compile(&format!(
            r"^\s*(?P<opcode>[A-Za-z]+)\s+(?P<sink>{0})\s*,\s*(?P<src1>[^,\s;]+)\s*,\s*(?P<src2>[^,\s;]+)\s*;?\s*$",
            REGISTER_NAME))?;
        let reg_init_re = compile(&format!(
            r"^\s*(?P<reg>{0})\s*=\s*(?P<value>[^\s;]+)\s*;?\s*$",
            REGISTER_NAME))?;
        let register_re = compile(&format!(r"^{0}$", REGISTER_NAME))?;

        Ok(Loader {
            instr_re,
            reg_init_re,
            register_re,
            section: Section::Text,
            code: Vec::new(),
            registers: RegisterFile::new(),
        })
    }

    fn load(mut self, src: &str) -> Result<Program, LoadError> {
        for (line_index, raw_line) in src.lines().enumerate() {
            let line_no = line_index + 1;
            let line = match raw_line.find("//") {
                Some(pos) => &raw_line[..pos],
                None => raw_line,
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if trimmed.starts_with('.') {
                self.parse_directive(trimmed, line_no)?;
                continue;
            }

            match self.section {
                Section::Registers => self.parse_reg_init(line, line_no)?,
                Section::Text => self.parse_instr(line, line_no)?,
            }
        }

        Ok(Program::new(self.code, self.registers))
    }

    fn parse_directive(&mut self, directive: &str, line_no: usize) -> Result<(), LoadError> {
        self.section = match directive.to_lowercase().as_str() {
            ".registers" => Section::Registers,
            ".text" => Section::Text,
            _ => return Err(parse_error(line_no, 1, format!("Unknown directive '{}'", directive))),
        };
        Ok(())
    }

    fn parse_reg_init(&mut self, line: &str, line_no: usize) -> Result<(), LoadError> {
        let Some(caps) = self.reg_init_re.captures(line) else {
            return Err(parse_error(line_no, 1, format!("Expected 'REGISTER = VALUE', found '{}'", line.trim())));
        };

        let reg = &caps["reg"];
        if self.registers.contains(reg) {
            return Err(parse_error(line_no, column(&caps, "reg"), format!("Duplicate register '{}'", reg)));
        }

        let value = parse_immediate(&caps["value"])
            .ok_or_else(|| parse_error(line_no, column(&caps, "value"),
                                       format!("Invalid value '{}'", &caps["value"])))?;
        self.registers.set_value(reg, value);
        Ok(())
    }

    fn parse_instr(&mut self, line: &str, line_no: usize) -> Result<(), LoadError> {
        let Some(caps) = self.instr_re.captures(line) else {
            return Err(parse_error(line_no, 1, format!("Expected 'OPCODE dst, src1, src2', found '{}'", line.trim())));
        };

        let opcode = get_opcode(&caps["opcode"])
            .ok_or_else(|| parse_error(line_no, column(&caps, "opcode"),
                                       format!("Unknown opcode '{}'", &caps["opcode"])))?;

        let src1 = self.parse_operand(&caps, "src1", line_no)?;
        let src2 = self.parse_operand(&caps, "src2", line_no)?;

        let mut instr = Instr::new(opcode, &caps["sink"], src1, src2);
        instr.loc = Some(SourceLocation { line: line_no, column: column(&caps, "opcode") });
        self.code.push(instr);
        Ok(())
    }

    fn parse_operand(&self, caps: &Captures<'_>, name: &str, line_no: usize) -> Result<Operand, LoadError> {
        let text = &caps[name];
        if let Some(value) = parse_immediate(text) {
            return Ok(Operand::Immediate(value));
        }
        if self.register_re.is_match(text) {
            return Ok(Operand::Register(text.to_string()));
        }
        Err(parse_error(line_no, column(caps, name),
                        format!("Expected a register or an immediate, found '{}'", text)))
    }
}

fn compile(pattern: &str) -> Result<Regex, LoadError> {
    Regex::new(pattern).map_err(|err| LoadError::ParseError(err.to_string()))
}

fn column(caps: &Captures<'_>, name: &str) -> usize {
    caps.name(name).map_or(1, |m| m.start() + 1)
}

fn parse_error(line: usize, column: usize, msg: String) -> LoadError {
    LoadError::ParseError(format!("{}:{}: {}", line, column, msg))
}

/// Parses `#10`, `#-3`, `#2.5` or the same without `#`. Integers stay integers.
fn parse_immediate(text: &str) -> Option<Word> {
    let text = text.strip_prefix('#').unwrap_or(text);
    if let Ok(value) = text.parse::<i64>() {
        return Some(Word::Int(value));
    }
    // f64 parsing also accepts "inf" and "NaN"; those are register names here
    text.parse::<f64>().ok().filter(|v| v.is_finite()).map(Word::Float)
}

pub fn load_from_string(src: &str) -> Result<Program, LoadError> {
    Loader::new()?.load(src)
}

pub fn load(path: &str) -> Result<Program, LoadError> {
    let input = fs::read_to_string(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => LoadError::NotFoundError(format!("File '{}' does not exist.", path)),
        _ => LoadError::IOError(format!("Error reading file '{}': {}", path, err)),
    })?;

    load_from_string(&input)
}
