//! Octal and symbolic permission modes.

use crate::error::{Result, SearchError};

const S_ISUID: u32 = 0o4000;
const S_ISGID: u32 = 0o2000;
const S_ISVTX: u32 = 0o1000;
const S_IRWXU: u32 = 0o700;
const S_IRWXG: u32 = 0o070;
const S_IRWXO: u32 = 0o007;
const S_IREAD_ALL: u32 = 0o444;
const S_IWRITE_ALL: u32 = 0o222;
const S_IEXEC_ALL: u32 = 0o111;

/// All permission bits including setuid, setgid and sticky.
pub const MODE_ALL: u32 = S_ISUID | S_ISGID | S_ISVTX | S_IRWXU | S_IRWXG | S_IRWXO;

const S_IFMT: u32 = 0o170000;
const S_IFSOCK: u32 = 0o140000;
const S_IFLNK: u32 = 0o120000;
const S_IFREG: u32 = 0o100000;
const S_IFBLK: u32 = 0o060000;
const S_IFDIR: u32 = 0o040000;
const S_IFCHR: u32 = 0o020000;
const S_IFIFO: u32 = 0o010000;

/// Parses a comma separated list of octal (`644`, `+111`) or symbolic
/// (`u+x`, `go-w`, `a=rw`) clauses into a permission mask.
pub fn parse_mode(raw: &str) -> Result<u32> {
    let invalid = || SearchError::Usage(format!("unable to parse {raw:?}"));

    let mut affected: u32 = 0;
    let mut result: u32 = 0;

    for part in raw.split(',') {
        let (operator, bits) = if let Some(clause) = parse_symbolic(part) {
            affected |= clause.affected;
            (clause.operator, clause.bits)
        } else if let Some((operator, octal)) = parse_octal(part) {
            affected = MODE_ALL;
            (operator, octal)
        } else {
            return Err(invalid());
        };

        match operator {
            '+' | '=' => result |= bits,
            '-' => result &= !bits,
            _ => return Err(invalid()),
        }
    }

    Ok(affected & result)
}

struct SymbolicClause {
    affected: u32,
    operator: char,
    bits: u32,
}

fn parse_symbolic(part: &str) -> Option<SymbolicClause> {
    let who_len = part
        .find(|c: char| !matches!(c, 'u' | 'g' | 'o' | 'a'))
        .unwrap_or(part.len());
    let (who, rest) = part.split_at(who_len);
    let mut chars = rest.chars();
    let operator = chars.next().filter(|c| matches!(c, '-' | '+' | '='))?;
    let perms = chars.as_str();
    if perms.is_empty() || !perms.chars().all(|c| "rwxXst".contains(c)) {
        return None;
    }

    let who = if who.is_empty() { "a" } else { who };
    let mut affected = 0;
    for c in who.chars() {
        affected |= match c {
            'u' => S_ISUID | S_IRWXU,
            'g' => S_ISGID | S_IRWXG,
            'o' => S_ISVTX | S_IRWXO,
            _ => MODE_ALL,
        };
    }

    let mut bits = 0;
    for c in perms.chars() {
        bits |= match c {
            'r' => S_IREAD_ALL,
            'w' => S_IWRITE_ALL,
            'x' => S_IEXEC_ALL,
            's' => S_ISUID | S_ISGID,
            't' => S_ISVTX,
            _ => 0,
        };
    }

    Some(SymbolicClause {
        affected,
        operator,
        bits,
    })
}

fn parse_octal(part: &str) -> Option<(char, u32)> {
    let (operator, digits) = match part.chars().next()? {
        c @ ('-' | '+' | '=') => (c, &part[1..]),
        _ => ('=', part),
    };
    if digits.is_empty() || !digits.chars().all(|c| ('0'..='7').contains(&c)) {
        return None;
    }
    u32::from_str_radix(digits, 8).ok().map(|bits| (operator, bits))
}

/// Renders a full `st_mode` the way `ls -l` does, e.g. `-rwxr-xr-x`.
pub fn format_mode(mode: u32) -> String {
    let kind = match mode & S_IFMT {
        S_IFDIR => 'd',
        S_IFLNK => 'l',
        S_IFSOCK => 's',
        S_IFIFO => 'p',
        S_IFCHR => 'c',
        S_IFBLK => 'b',
        S_IFREG => '-',
        _ => '?',
    };

    let triplet = |shift: u32, special: u32, set: char, unset: char| {
        let bits = (mode >> shift) & 0o7;
        let read = if bits & 0o4 != 0 { 'r' } else { '-' };
        let write = if bits & 0o2 != 0 { 'w' } else { '-' };
        let exec = match (bits & 0o1 != 0, mode & special != 0) {
            (true, true) => set,
            (false, true) => unset,
            (true, false) => 'x',
            (false, false) => '-',
        };
        [read, write, exec]
    };

    let mut out = String::with_capacity(10);
    out.push(kind);
    out.extend(triplet(6, S_ISUID, 's', 'S'));
    out.extend(triplet(3, S_ISGID, 's', 'S'));
    out.extend(triplet(0, S_ISVTX, 't', 'T'));
    out
}
