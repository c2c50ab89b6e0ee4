//! Mode tables and mode-string translation
//!
//! Every linked server carries its own letter↔name tables, so the same
//! logical mode may ride under different letters on different servers. The
//! functions here bridge those tables: they rewrite mode strings between
//! peers, compute minimal differences, and serialise structured change lists
//! into wire-sized chunks.

use std::collections::HashMap;
use std::fmt;

/// Channel mode categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeType {
    /// Flag with no parameter
    Normal,
    /// Always takes a parameter
    Parameter,
    /// Takes a parameter when setting; consumes one when unsetting only if present
    ParameterSet,
    /// Multi-entry list (bans and friends)
    List,
    /// Status rank whose parameter is a user identifier
    Status,
}

impl ModeType {
    /// Wire-level type code
    pub fn code(&self) -> u8 {
        match self {
            ModeType::Normal => 0,
            ModeType::Parameter => 1,
            ModeType::ParameterSet => 2,
            ModeType::List => 3,
            ModeType::Status => 4,
        }
    }
}

/// Whether a mode consumes a parameter in a given direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamNeed {
    Never,
    Always,
    IfPresent,
}

/// One mode definition in a server's table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeDef {
    pub letter: char,
    pub kind: ModeType,
}

/// Letter↔name mapping for one server
#[derive(Debug, Clone, Default)]
pub struct ModeTable {
    by_name: HashMap<String, ModeDef>,
    by_letter: HashMap<char, String>,
}

impl ModeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mode; a repeated name or letter replaces the old entry
    pub fn add(&mut self, name: &str, letter: char, kind: ModeType) {
        if let Some(old) = self.by_name.insert(name.to_string(), ModeDef { letter, kind }) {
            self.by_letter.remove(&old.letter);
        }
        self.by_letter.insert(letter, name.to_string());
    }

    pub fn letter(&self, name: &str) -> Option<char> {
        self.by_name.get(name).map(|d| d.letter)
    }

    pub fn name(&self, letter: char) -> Option<&str> {
        self.by_letter.get(&letter).map(|s| s.as_str())
    }

    pub fn def(&self, name: &str) -> Option<ModeDef> {
        self.by_name.get(name).copied()
    }

    pub fn kind_of_letter(&self, letter: char) -> Option<ModeType> {
        self.name(letter).and_then(|n| self.def(n)).map(|d| d.kind)
    }

    /// Parameter consumption for a mode in the given direction
    pub fn takes_parameter(&self, name: &str, setting: bool) -> ParamNeed {
        match self.def(name).map(|d| d.kind) {
            Some(ModeType::Normal) | None => ParamNeed::Never,
            Some(ModeType::Parameter) | Some(ModeType::List) | Some(ModeType::Status) => {
                ParamNeed::Always
            }
            Some(ModeType::ParameterSet) => {
                if setting {
                    ParamNeed::Always
                } else {
                    ParamNeed::IfPresent
                }
            }
        }
    }

    /// Mode names in table order is unspecified; expose letters sorted for
    /// ISUPPORT-style listings.
    pub fn letters(&self) -> Vec<char> {
        let mut letters: Vec<char> = self.by_letter.keys().copied().collect();
        letters.sort_unstable();
        letters
    }
}

/// The user mode set every server in this family starts from
pub fn standard_umodes() -> ModeTable {
    let mut t = ModeTable::new();
    t.add("invisible", 'i', ModeType::Normal);
    t.add("wallops", 'w', ModeType::Normal);
    t.add("ircop", 'o', ModeType::Normal);
    t.add("ssl", 'z', ModeType::Normal);
    t
}

/// The channel mode set every server in this family starts from
pub fn standard_cmodes() -> ModeTable {
    let mut t = ModeTable::new();
    t.add("no_ext", 'n', ModeType::Normal);
    t.add("moderated", 'm', ModeType::Normal);
    t.add("invite_only", 'i', ModeType::Normal);
    t.add("secret", 's', ModeType::Normal);
    t.add("key", 'k', ModeType::ParameterSet);
    t.add("limit", 'l', ModeType::ParameterSet);
    t.add("ban", 'b', ModeType::List);
    t.add("op", 'o', ModeType::Status);
    t.add("voice", 'v', ModeType::Status);
    t
}

/// Collapse a list of applied (adding, letter) pairs into a canonical mode
/// string: no adjacent duplicate signs, empty when nothing applied.
pub fn collapse(parts: &[(bool, char)]) -> String {
    let mut out = String::new();
    let mut last: Option<bool> = None;
    for &(adding, letter) in parts {
        if last != Some(adding) {
            out.push(if adding { '+' } else { '-' });
            last = Some(adding);
        }
        out.push(letter);
    }
    out
}

/// Rewrite a user mode string from one server's letters to another's.
///
/// Letters unknown on either side are dropped; a sign with no surviving
/// letters is dropped with them. A fully-empty result is returned as `"+"`.
pub fn convert_umode_string(from: &ModeTable, to: &ModeTable, s: &str) -> String {
    let mut adding = true;
    let mut applied = Vec::new();

    for c in s.chars() {
        match c {
            '+' => adding = true,
            '-' => adding = false,
            letter => {
                if let Some(target) = from.name(letter).and_then(|name| to.letter(name)) {
                    applied.push((adding, target));
                }
            }
        }
    }

    let out = collapse(&applied);
    if out.is_empty() {
        "+".to_string()
    } else {
        out
    }
}

/// Rewrite a channel mode string (letters plus parameters) between servers.
///
/// Parameter consumption follows the *source* server's table. When
/// `over_protocol` is set, status-mode parameters are translated through
/// `translate_user` (UID in, UID out); when `skip_status` is set, status
/// entries are dropped entirely.
pub fn convert_cmode_string(
    from: &ModeTable,
    to: &ModeTable,
    s: &str,
    over_protocol: bool,
    skip_status: bool,
    translate_user: &dyn Fn(&str) -> Option<String>,
) -> String {
    let mut words = s.split_whitespace();
    let letters = words.next().unwrap_or("");
    let mut params: std::collections::VecDeque<&str> = words.collect();

    let mut adding = true;
    let mut applied = Vec::new();
    let mut out_params = Vec::new();

    for c in letters.chars() {
        match c {
            '+' => adding = true,
            '-' => adding = false,
            letter => {
                let name = match from.name(letter) {
                    Some(name) => name,
                    None => continue,
                };
                let def = from.def(name).unwrap();
                let param = match from.takes_parameter(name, adding) {
                    ParamNeed::Always => params.pop_front(),
                    ParamNeed::IfPresent => params.pop_front(),
                    ParamNeed::Never => None,
                };

                if skip_status && def.kind == ModeType::Status {
                    continue;
                }
                let target = match to.letter(name) {
                    Some(target) => target,
                    // Untranslatable on the target; its parameter dies with it.
                    None => continue,
                };

                applied.push((adding, target));
                if let Some(param) = param {
                    let rendered = if def.kind == ModeType::Status && over_protocol {
                        translate_user(param).unwrap_or_else(|| param.to_string())
                    } else {
                        param.to_string()
                    };
                    out_params.push(rendered);
                }
            }
        }
    }

    let mut out = collapse(&applied);
    if out.is_empty() {
        return "+".to_string();
    }
    for p in out_params {
        out.push(' ');
        out.push_str(&p);
    }
    out
}

/// Parse a positive normalised mode string into (letter, parameter) pairs
fn parse_positive(table: &ModeTable, s: &str) -> Vec<(char, Option<String>)> {
    let mut words = s.split_whitespace();
    let letters = words.next().unwrap_or("");
    let mut params: std::collections::VecDeque<&str> = words.collect();

    let mut out = Vec::new();
    for c in letters.chars() {
        if c == '+' || c == '-' {
            continue;
        }
        let param = match table.name(c).map(|n| table.takes_parameter(n, true)) {
            Some(ParamNeed::Always) | Some(ParamNeed::IfPresent) => {
                params.pop_front().map(|p| p.to_string())
            }
            _ => None,
        };
        out.push((c, param));
    }
    out
}

/// Minimal change bringing `old` to `new`; both inputs are positive
/// normalised mode strings over `table`'s letters.
///
/// Parameterised modes compare as `(letter, param)` pairs, so multiple
/// instances per letter are supported; inputs must not carry duplicate
/// identical entries. `remove_none` suppresses all removals; `combine_lists`
/// suppresses removals of list modes only.
pub fn cmode_string_difference(
    table: &ModeTable,
    old: &str,
    new: &str,
    combine_lists: bool,
    remove_none: bool,
) -> String {
    let old_modes = parse_positive(table, old);
    let new_modes = parse_positive(table, new);

    let adds: Vec<&(char, Option<String>)> =
        new_modes.iter().filter(|e| !old_modes.contains(e)).collect();
    let removes: Vec<&(char, Option<String>)> = if remove_none {
        Vec::new()
    } else {
        old_modes
            .iter()
            .filter(|e| !new_modes.contains(e))
            .filter(|(letter, _)| {
                !(combine_lists && table.kind_of_letter(*letter) == Some(ModeType::List))
            })
            .collect()
    };

    let mut out = String::new();
    let mut params = Vec::new();

    if !adds.is_empty() || removes.is_empty() {
        out.push('+');
        for (letter, param) in &adds {
            out.push(*letter);
            if let Some(p) = param {
                params.push(p.clone());
            }
        }
    }
    if !removes.is_empty() {
        out.push('-');
        for (letter, param) in &removes {
            out.push(*letter);
            if let Some(p) = param {
                params.push(p.clone());
            }
        }
    }

    for p in params {
        out.push(' ');
        out.push_str(&p);
    }
    out
}

/// A parameter attached to a structured mode change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeParam {
    /// A user: rendered as UID over protocol, nickname toward clients
    User { uid: String, nick: String },
    /// A server: rendered as SID over protocol, name toward clients
    Server { sid: String, name: String },
    /// Anything exposing a name
    Named(String),
    /// Raw value
    Raw(String),
}

impl ModeParam {
    /// Stringify for the chosen audience
    pub fn render(&self, over_protocol: bool) -> String {
        match self {
            ModeParam::User { uid, nick } => {
                if over_protocol {
                    uid.clone()
                } else {
                    nick.clone()
                }
            }
            ModeParam::Server { sid, name } => {
                if over_protocol {
                    sid.clone()
                } else {
                    name.clone()
                }
            }
            ModeParam::Named(name) => name.clone(),
            ModeParam::Raw(value) => value.clone(),
        }
    }
}

/// One structured mode change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeChange {
    pub adding: bool,
    pub name: String,
    pub param: Option<ModeParam>,
}

impl ModeChange {
    pub fn add(name: &str, param: Option<ModeParam>) -> Self {
        Self {
            adding: true,
            name: name.to_string(),
            param,
        }
    }

    pub fn remove(name: &str, param: Option<ModeParam>) -> Self {
        Self {
            adding: false,
            name: name.to_string(),
            param,
        }
    }
}

impl fmt::Display for ModeChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", if self.adding { '+' } else { '-' }, self.name)
    }
}

/// Serialise a structured change list into one or more wire mode strings.
///
/// `limit` caps the number of mode letters per output string (0 = no split).
/// With `organize`, positive changes sort before negative ones and each run
/// sorts alphabetically by name. Unless `skip_checks`, changes whose mode is
/// missing a required parameter are dropped.
pub fn strings_from_cmodes(
    table: &ModeTable,
    changes: &[ModeChange],
    over_protocol: bool,
    limit: usize,
    organize: bool,
    skip_checks: bool,
) -> Vec<String> {
    let mut changes: Vec<&ModeChange> = changes.iter().collect();
    if organize {
        changes.sort_by(|a, b| {
            b.adding
                .cmp(&a.adding)
                .then_with(|| a.name.cmp(&b.name))
        });
    }

    let mut out = Vec::new();
    let mut chunk: Vec<(bool, char)> = Vec::new();
    let mut chunk_params: Vec<String> = Vec::new();

    let flush = |chunk: &mut Vec<(bool, char)>, params: &mut Vec<String>, out: &mut Vec<String>| {
        if chunk.is_empty() {
            return;
        }
        let mut s = collapse(chunk);
        for p in params.drain(..) {
            s.push(' ');
            s.push_str(&p);
        }
        out.push(s);
        chunk.clear();
    };

    for change in changes {
        let letter = match table.letter(&change.name) {
            Some(letter) => letter,
            None => continue,
        };
        if !skip_checks
            && change.param.is_none()
            && table.takes_parameter(&change.name, change.adding) == ParamNeed::Always
        {
            continue;
        }

        chunk.push((change.adding, letter));
        if let Some(ref param) = change.param {
            chunk_params.push(param.render(over_protocol));
        }
        if limit > 0 && chunk.len() == limit {
            flush(&mut chunk, &mut chunk_params, &mut out);
        }
    }
    flush(&mut chunk, &mut chunk_params, &mut out);
    out
}
