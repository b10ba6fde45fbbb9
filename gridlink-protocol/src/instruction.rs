//! The pack-instruction schema language.
//!
//! A pack instruction is a `;`-separated list of items, each of the form
//! `typecast [sigil] name`. The typecast is one of the scalar keywords
//! (`char`, `bin`, `str`, `piStr`, `int`, `int16`, `double`), `struct`
//! (the name doubles as the nested type name), or a dependent marker:
//! `? ref` resolves its real type from an earlier `piStr` field, and
//! `% key:v=sub:...:default=sub` splices a sub-instruction chosen by an
//! earlier integer field. A name may carry `[expr]` fixed dimensions and
//! `(expr)` hint dimensions, where `expr` is a decimal literal, a sibling
//! or ancestor field name, or a global constant name.

use crate::error::ProtocolError;

/// Maximum number of fixed or hint dimensions per item.
pub const MAX_DIMS: usize = 8;

/// Scalar and structural type tags of the instruction language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    /// Fixed byte block, copied verbatim (raw text under XML).
    Char,
    /// Fixed byte block, base64 under XML.
    Bin,
    /// NUL-terminated string.
    Str,
    /// String whose value may name a type for a later `?` item.
    PiStr,
    /// 32-bit signed integer, network byte order.
    Int,
    /// 16-bit signed integer, network byte order.
    Int16,
    /// 64-bit signed integer ("wide" field), network byte order.
    Double,
    /// Nested record; the item name is the nested type name.
    Struct,
    /// String-dependent item (`?`).
    DependStr,
    /// Integer-dependent item (`%`).
    DependInt,
}

impl TypeTag {
    /// Looks up a typecast keyword.
    pub fn from_keyword(word: &str) -> Option<TypeTag> {
        match word {
            "char" => Some(TypeTag::Char),
            "bin" => Some(TypeTag::Bin),
            "str" => Some(TypeTag::Str),
            "piStr" => Some(TypeTag::PiStr),
            "int" => Some(TypeTag::Int),
            "int16" => Some(TypeTag::Int16),
            "double" => Some(TypeTag::Double),
            "struct" => Some(TypeTag::Struct),
            _ => None,
        }
    }
}

/// Pointer kind of an item, from its trailing sigil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointerKind {
    /// Plain in-line value, no sigil.
    #[default]
    Value,
    /// `*` - owning pointer.
    Owned,
    /// `#` - pointer stored out of line and referenced by integer index.
    Indexed,
    /// `$` - pointer the encoder must never free.
    Borrowed,
}

impl PointerKind {
    pub fn is_pointer(self) -> bool {
        self != PointerKind::Value
    }
}

/// A dimension expression: a literal count or a name resolved at run time
/// against sibling fields and the constant table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dim {
    Lit(i32),
    Ref(String),
}

/// One arm selector of an integer-dependent item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArmKey {
    Value(i32),
    Default,
}

/// One arm of an integer-dependent item: selectors plus the parsed
/// sub-instruction spliced in when an arm matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arm {
    pub keys: Vec<ArmKey>,
    pub items: Vec<Item>,
}

/// The key expression and arms of an integer-dependent (`%`) item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepTable {
    pub key: Dim,
    pub arms: Vec<Arm>,
}

/// One parsed item of a pack instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub tag: TypeTag,
    /// Field name; for `struct` items also the nested type name. For `%`
    /// items this is empty (the spliced sub-items carry the names).
    pub name: String,
    pub pointer: PointerKind,
    /// `[expr]` data-layout array dimensions.
    pub dims: Vec<Dim>,
    /// `(expr)` pointee-array dimensions.
    pub hints: Vec<Dim>,
    /// `?` items: the earlier `piStr` field naming the real type.
    pub dep_ref: Option<String>,
    /// `%` items: the key/arm table.
    pub dep_table: Option<DepTable>,
}

impl Item {
    fn new(tag: TypeTag) -> Item {
        Item {
            tag,
            name: String::new(),
            pointer: PointerKind::Value,
            dims: Vec::new(),
            hints: Vec::new(),
            dep_ref: None,
            dep_table: None,
        }
    }
}

/// Tokenizer over instruction text. `*`, `;`, `?`, `$` and `#` are
/// standalone tokens; everything else splits on whitespace.
struct Scanner<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Scanner<'a> {
        Scanner {
            src: src.as_bytes(),
            pos: 0,
        }
    }

    fn next_token(&mut self) -> Option<&'a str> {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        if self.pos >= self.src.len() {
            return None;
        }
        let start = self.pos;
        if matches!(self.src[self.pos], b'*' | b';' | b'?' | b'$' | b'#') {
            self.pos += 1;
        } else {
            while self.pos < self.src.len()
                && !self.src[self.pos].is_ascii_whitespace()
                && !matches!(self.src[self.pos], b'*' | b';' | b'?' | b'$' | b'#')
            {
                self.pos += 1;
            }
        }
        // instruction text is ASCII; keep the slice borrowed
        std::str::from_utf8(&self.src[start..self.pos]).ok()
    }

    /// Everything up to (not including) the next `;`, leading space trimmed.
    /// Used for the `%` item body, which may contain spaces and `=`.
    fn rest_until_semi(&mut self) -> &'a str {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        let start = self.pos;
        while self.pos < self.src.len() && self.src[self.pos] != b';' {
            self.pos += 1;
        }
        std::str::from_utf8(&self.src[start..self.pos])
            .unwrap_or("")
            .trim_end()
    }
}

fn format_err(text: &str, what: &str) -> ProtocolError {
    ProtocolError::Format(format!("{what} in \"{text}\""))
}

/// Parses instruction text into an ordered item list. Parsing the same text
/// twice yields structurally equal lists.
pub fn parse_instruction(text: &str) -> Result<Vec<Item>, ProtocolError> {
    let mut items = Vec::new();
    let mut sc = Scanner::new(text);
    let mut cur: Option<Item> = None;
    let mut has_name = false;

    while let Some(tok) = sc.next_token() {
        match tok {
            ";" => match cur.take() {
                None => continue,
                Some(item) => {
                    if !has_name {
                        return Err(format_err(text, "item with no field name"));
                    }
                    has_name = false;
                    items.push(item);
                }
            },
            "%" => {
                if cur.is_some() {
                    return Err(format_err(text, "% not at item start"));
                }
                let body = sc.rest_until_semi();
                if body.is_empty() {
                    return Err(format_err(text, "% with no key table"));
                }
                let mut item = Item::new(TypeTag::DependInt);
                item.dep_table = Some(parse_dep_table(body)?);
                cur = Some(item);
                has_name = true;
            }
            "?" => {
                if cur.is_some() {
                    return Err(format_err(text, "? not at item start"));
                }
                let dep = match sc.next_token() {
                    Some(w) if !matches!(w, ";" | "*" | "#" | "$" | "?") => w,
                    _ => return Err(format_err(text, "no variable following ?")),
                };
                let mut item = Item::new(TypeTag::DependStr);
                item.dep_ref = Some(dep.to_string());
                cur = Some(item);
            }
            "*" | "#" | "$" => {
                let item = match cur.as_mut() {
                    Some(item) if !has_name => item,
                    _ => return Err(format_err(text, "pointer sigil out of order")),
                };
                item.pointer = match tok {
                    "*" => PointerKind::Owned,
                    "#" => PointerKind::Indexed,
                    _ => PointerKind::Borrowed,
                };
            }
            word => match cur.as_mut() {
                None => {
                    let tag = TypeTag::from_keyword(word)
                        .ok_or_else(|| format_err(text, "unknown typecast"))?;
                    cur = Some(Item::new(tag));
                }
                Some(item) if !has_name => {
                    let (name, dims, hints) = parse_name(text, word)?;
                    item.name = name;
                    item.dims = dims;
                    item.hints = hints;
                    has_name = true;
                }
                Some(_) => return Err(format_err(text, "too many tokens")),
            },
        }
    }

    if cur.is_some() {
        return Err(format_err(text, "instruction not terminated"));
    }
    Ok(items)
}

/// Splits a raw name token into the bare name plus `[...]` and `(...)`
/// dimension expressions.
fn parse_name(text: &str, raw: &str) -> Result<(String, Vec<Dim>, Vec<Dim>), ProtocolError> {
    let mut name = String::new();
    let mut dims = Vec::new();
    let mut hints = Vec::new();
    let mut open: Option<char> = None;
    let mut buf = String::new();
    let mut name_done = false;

    for c in raw.chars() {
        match c {
            '[' | '(' => {
                if open.is_some() {
                    return Err(format_err(text, "nested brackets"));
                }
                let depth = if c == '[' { dims.len() } else { hints.len() };
                if depth >= MAX_DIMS {
                    return Err(format_err(text, "too many dimensions"));
                }
                open = Some(c);
                name_done = true;
                buf.clear();
            }
            ']' | ')' => {
                let expected = if c == ']' { '[' } else { '(' };
                if open != Some(expected) {
                    return Err(format_err(text, "unmatched bracket"));
                }
                if buf.trim().is_empty() {
                    return Err(format_err(text, "empty brackets"));
                }
                let dim = parse_dim(text, &buf)?;
                if c == ']' {
                    dims.push(dim);
                } else {
                    hints.push(dim);
                }
                open = None;
            }
            _ => {
                if open.is_some() {
                    buf.push(c);
                } else if !name_done {
                    name.push(c);
                }
            }
        }
    }

    if open.is_some() {
        return Err(format_err(text, "unmatched bracket"));
    }
    if name.is_empty() {
        return Err(format_err(text, "item with no field name"));
    }
    Ok((name, dims, hints))
}

fn parse_dim(text: &str, expr: &str) -> Result<Dim, ProtocolError> {
    let t = expr.trim();
    if t.bytes().all(|b| b.is_ascii_digit()) {
        t.parse::<i32>()
            .map(Dim::Lit)
            .map_err(|_| format_err(text, "dimension literal out of range"))
    } else {
        Ok(Dim::Ref(t.to_string()))
    }
}

/// Parses the `key:v[,v...]=sub:...:default=sub` body of a `%` item. Arm
/// sub-instructions are parsed eagerly so malformed arms surface at parse
/// time.
fn parse_dep_table(body: &str) -> Result<DepTable, ProtocolError> {
    let (key_raw, rest) = body
        .split_once(':')
        .ok_or_else(|| format_err(body, "dependent item with no arms"))?;
    let key = parse_dim(body, key_raw)?;

    let mut arms = Vec::new();
    for arm_text in rest.split(':') {
        let (vals, sub) = arm_text
            .split_once('=')
            .ok_or_else(|| format_err(body, "dependent arm with no sub-instruction"))?;
        let mut keys = Vec::new();
        for v in vals.split(',') {
            let t = v.trim();
            if t == "default" {
                keys.push(ArmKey::Default);
            } else {
                let n = t
                    .parse::<i32>()
                    .map_err(|_| format_err(body, "bad dependent arm value"))?;
                keys.push(ArmKey::Value(n));
            }
        }
        let mut sub_text = sub.trim().to_string();
        sub_text.push(';');
        arms.push(Arm {
            keys,
            items: parse_instruction(&sub_text)?,
        });
    }
    if arms.is_empty() {
        return Err(format_err(body, "dependent item with no arms"));
    }
    Ok(DepTable { key, arms })
}
