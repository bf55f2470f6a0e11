//! Port-access script language.
//!
//! One command per line, `#` starts a comment, numbers are decimal or `0x`
//! hex. Ports are offsets from the card's iobase.

use anyhow::{anyhow, bail, Context, Result};
use aqp_core::debugger::WatchKind;
use aqp_core::PORT_SPAN;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `r PORT`
    Read(u8),
    /// `w PORT BYTE`
    Write(u8, u8),
    /// `expect PORT BYTE`
    Expect(u8, u8),
    Reset,
    /// `poke ADDR VALUE`
    Poke(u32, u32),
    /// `peek ADDR`
    Peek(u32),
    /// `link TAG LEN`
    Link(u32, usize),
    Detect,
    /// `watch PORT [r|w|rw]`
    Watch(u8, WatchKind),
    /// Device state summary
    Dump,
    /// `mem START_WORD COUNT`
    Mem(usize, usize),
    /// Recent port accesses
    Trace,
}

pub fn parse_num(s: &str) -> Result<u64> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.with_context(|| format!("bad number '{}'", s))
}

fn num<T: TryFrom<u64>>(s: Option<&str>, what: &str) -> Result<T> {
    let s = s.ok_or_else(|| anyhow!("missing {}", what))?;
    let n = parse_num(s)?;
    T::try_from(n).map_err(|_| anyhow!("{} out of range: {}", what, s))
}

fn port(s: Option<&str>) -> Result<u8> {
    let p: u8 = num(s, "port")?;
    if u16::from(p) >= PORT_SPAN {
        bail!("port +0x{:02X} outside the card's {} ports", p, PORT_SPAN);
    }
    Ok(p)
}

/// Parse one line. Blank lines and comments give `None`.
pub fn parse_line(line: &str) -> Result<Option<Command>> {
    let line = line.split('#').next().unwrap_or("").trim();
    let mut words = line.split_whitespace();
    let Some(op) = words.next() else { return Ok(None) };

    let cmd = match op.to_ascii_lowercase().as_str() {
        "r" | "read" => Command::Read(port(words.next())?),
        "w" | "write" => Command::Write(port(words.next())?, num(words.next(), "byte")?),
        "expect" => Command::Expect(port(words.next())?, num(words.next(), "byte")?),
        "reset" => Command::Reset,
        "poke" => Command::Poke(num(words.next(), "address")?, num(words.next(), "value")?),
        "peek" => Command::Peek(num(words.next(), "address")?),
        "link" => Command::Link(num(words.next(), "tag")?, num(words.next(), "length")?),
        "detect" => Command::Detect,
        "watch" => {
            let p = port(words.next())?;
            let kind = match words.next().map(|k| k.to_ascii_lowercase()) {
                None => WatchKind::ReadWrite,
                Some(k) => match k.as_str() {
                    "r" => WatchKind::Read,
                    "w" => WatchKind::Write,
                    "rw" => WatchKind::ReadWrite,
                    other => bail!("bad watch kind '{}'", other),
                },
            };
            Command::Watch(p, kind)
        }
        "dump" => Command::Dump,
        "mem" => Command::Mem(num(words.next(), "word index")?, num(words.next(), "count")?),
        "trace" => Command::Trace,
        other => bail!("unknown command '{}'", other),
    };
    if let Some(extra) = words.next() {
        bail!("unexpected '{}' after {}", extra, op);
    }
    Ok(Some(cmd))
}

/// Parse a whole script, keeping 1-based line numbers for error reports.
pub fn parse_script(text: &str) -> Result<Vec<(usize, Command)>> {
    let mut out = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let cmd = parse_line(line).with_context(|| format!("line {}", i + 1))?;
        if let Some(cmd) = cmd {
            out.push((i + 1, cmd));
        }
    }
    Ok(out)
}
