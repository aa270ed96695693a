use crate::config::SearchOptions;
use crate::errors::CompileError;

use super::parser::{self, AssertKind, Ast, ClassSet};

/// Sentinel edge index: "no edge".
pub const NO_EDGE: u16 = u16::MAX;

/// Host-side NFA state cap. Patterns needing more states are rejected with
/// `PatternTooComplex`.
pub const MAX_STATES: usize = 4096;

/// Device-side state cap: the kernels track state sets as fixed bitmasks,
/// so larger automata are routed to the CPU by the dispatcher.
pub const GPU_MAX_STATES: usize = 1024;

/// State kinds. The discriminants are the tag bytes of the packed GPU
/// layout, so their values are part of the wire format. Kinds 12..=17 are
/// reserved for the Perl-compatible adapter and never produced by this
/// compiler.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Literal = 0,
    Class = 1,
    Dot = 2,
    Any = 3,
    Split = 4,
    Match = 5,
    GroupStart = 6,
    GroupEnd = 7,
    WordBoundary = 8,
    NotWordBoundary = 9,
    LineStart = 10,
    LineEnd = 11,
    LookaheadPos = 12,
    LookaheadNeg = 13,
    LookbehindPos = 14,
    LookbehindNeg = 15,
    AtomicGroup = 16,
    NonGreedy = 17,
}

/// One NFA state. All edges are indices into the owning state array;
/// the array is the arena, so cycles carry no ownership.
#[derive(Debug, Clone, Copy)]
pub struct State {
    pub kind: StateKind,
    pub out: u16,
    pub out2: u16,
    /// The byte a `Literal` state consumes.
    pub byte: u8,
    /// Capture index for group markers.
    pub group: u8,
    /// Index into the class bitmap pool for `Class` states.
    pub class: u16,
    pub case_insensitive: bool,
    pub negated: bool,
}

impl State {
    fn new(kind: StateKind) -> Self {
        Self {
            kind,
            out: NO_EDGE,
            out2: NO_EDGE,
            byte: 0,
            group: 0,
            class: NO_EDGE,
            case_insensitive: false,
            negated: false,
        }
    }
}

/// A compiled pattern: the state arena plus the metadata every evaluator
/// needs. Owned by the caller for the duration of one or more searches.
#[derive(Debug, Clone)]
pub struct CompiledRegex {
    pub states: Vec<State>,
    /// 256-bit bitmaps for `Class` states, 8 words each.
    pub classes: Vec<[u32; 8]>,
    pub start: u16,
    pub num_groups: u8,
    pub anchored_start: bool,
    pub anchored_end: bool,
    pub case_insensitive: bool,
}

impl CompiledRegex {
    /// Compiles `pattern` under `options` (BRE unless `options.extended`).
    pub fn compile(pattern: &[u8], options: &SearchOptions) -> Result<Self, CompileError> {
        let (ast, num_groups) = if options.extended {
            parser::parse(pattern)?
        } else {
            parser::parse(&parser::translate_bre(pattern))?
        };

        let mut b = Builder {
            states: Vec::new(),
            classes: Vec::new(),
            case_insensitive: options.case_insensitive,
        };
        let frag = b.compile_node(&ast)?;
        let accept = b.push(State::new(StateKind::Match))?;
        b.patch(&frag.outs, accept);

        Ok(CompiledRegex {
            states: b.states,
            classes: b.classes,
            start: frag.start,
            num_groups,
            anchored_start: leading_assert(&ast) == Some(AssertKind::LineStart),
            anchored_end: trailing_assert(&ast) == Some(AssertKind::LineEnd),
            case_insensitive: options.case_insensitive,
        })
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    /// Whether the automaton fits the device-side state tracker.
    pub fn fits_gpu(&self) -> bool {
        self.states.len() <= GPU_MAX_STATES
    }
}

fn leading_assert(ast: &Ast) -> Option<AssertKind> {
    match ast {
        Ast::Assert(k) => Some(*k),
        Ast::Concat(parts) => parts.first().and_then(leading_assert),
        Ast::Group(inner, _) => leading_assert(inner),
        _ => None,
    }
}

fn trailing_assert(ast: &Ast) -> Option<AssertKind> {
    match ast {
        Ast::Assert(k) => Some(*k),
        Ast::Concat(parts) => parts.last().and_then(trailing_assert),
        Ast::Group(inner, _) => trailing_assert(inner),
        _ => None,
    }
}

/// A dangling out-edge awaiting its target.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Out(u16),
    Out2(u16),
}

/// Fragment of the automaton under construction: an entry state and the
/// list of edges that leave the fragment.
struct Frag {
    start: u16,
    outs: Vec<Slot>,
}

struct Builder {
    states: Vec<State>,
    classes: Vec<[u32; 8]>,
    case_insensitive: bool,
}

impl Builder {
    fn push(&mut self, state: State) -> Result<u16, CompileError> {
        if self.states.len() >= MAX_STATES {
            return Err(CompileError::PatternTooComplex(MAX_STATES));
        }
        self.states.push(state);
        Ok((self.states.len() - 1) as u16)
    }

    fn patch(&mut self, outs: &[Slot], target: u16) {
        for slot in outs {
            match *slot {
                Slot::Out(s) => self.states[s as usize].out = target,
                Slot::Out2(s) => self.states[s as usize].out2 = target,
            }
        }
    }

    fn compile_node(&mut self, ast: &Ast) -> Result<Frag, CompileError> {
        match ast {
            Ast::Empty => {
                // pass-through split with a single dangling edge
                let s = self.push(State::new(StateKind::Split))?;
                Ok(Frag {
                    start: s,
                    outs: vec![Slot::Out(s)],
                })
            }
            Ast::Literal(b) => {
                let mut st = State::new(StateKind::Literal);
                st.byte = *b;
                st.case_insensitive = self.case_insensitive && b.is_ascii_alphabetic();
                let s = self.push(st)?;
                Ok(Frag {
                    start: s,
                    outs: vec![Slot::Out(s)],
                })
            }
            Ast::Dot => {
                let s = self.push(State::new(StateKind::Dot))?;
                Ok(Frag {
                    start: s,
                    outs: vec![Slot::Out(s)],
                })
            }
            Ast::Class(set) => {
                let mut folded: ClassSet = *set;
                if self.case_insensitive {
                    folded.fold_case();
                }
                let class_idx = self.classes.len() as u16;
                self.classes.push(folded.bits);
                let mut st = State::new(StateKind::Class);
                st.class = class_idx;
                st.negated = folded.negated;
                let s = self.push(st)?;
                Ok(Frag {
                    start: s,
                    outs: vec![Slot::Out(s)],
                })
            }
            Ast::Assert(kind) => {
                let state_kind = match kind {
                    AssertKind::LineStart => StateKind::LineStart,
                    AssertKind::LineEnd => StateKind::LineEnd,
                    AssertKind::WordBoundary => StateKind::WordBoundary,
                    AssertKind::NotWordBoundary => StateKind::NotWordBoundary,
                };
                let s = self.push(State::new(state_kind))?;
                Ok(Frag {
                    start: s,
                    outs: vec![Slot::Out(s)],
                })
            }
            Ast::Group(inner, idx) => {
                let mut open = State::new(StateKind::GroupStart);
                open.group = *idx;
                let open_s = self.push(open)?;
                let body = self.compile_node(inner)?;
                self.states[open_s as usize].out = body.start;
                let mut close = State::new(StateKind::GroupEnd);
                close.group = *idx;
                let close_s = self.push(close)?;
                self.patch(&body.outs, close_s);
                Ok(Frag {
                    start: open_s,
                    outs: vec![Slot::Out(close_s)],
                })
            }
            Ast::Concat(parts) => {
                let mut iter = parts.iter();
                let first = iter
                    .next()
                    .map(|n| self.compile_node(n))
                    .unwrap_or_else(|| self.compile_node(&Ast::Empty))?;
                let mut frag = first;
                for part in iter {
                    let next = self.compile_node(part)?;
                    self.patch(&frag.outs, next.start);
                    frag = Frag {
                        start: frag.start,
                        outs: next.outs,
                    };
                }
                Ok(frag)
            }
            Ast::Alternate(branches) => {
                let mut starts = Vec::with_capacity(branches.len());
                let mut outs = Vec::new();
                for branch in branches {
                    let frag = self.compile_node(branch)?;
                    starts.push(frag.start);
                    outs.extend(frag.outs);
                }
                // fold branch entries into a right-leaning chain of splits
                let Some(mut entry) = starts.pop() else {
                    return self.compile_node(&Ast::Empty);
                };
                for &s in starts.iter().rev() {
                    let mut split = State::new(StateKind::Split);
                    split.out = s;
                    split.out2 = entry;
                    entry = self.push(split)?;
                }
                Ok(Frag {
                    start: entry,
                    outs,
                })
            }
            Ast::Repeat { node, min, max } => self.compile_repeat(node, *min, *max),
        }
    }

    fn compile_repeat(
        &mut self,
        node: &Ast,
        min: u32,
        max: Option<u32>,
    ) -> Result<Frag, CompileError> {
        match (min, max) {
            (0, Some(0)) => self.compile_node(&Ast::Empty),
            (0, None) => self.compile_star(node),
            (1, None) => self.compile_plus(node),
            (0, Some(1)) => self.compile_question(node),
            (n, None) => {
                // n-1 mandatory copies then one-or-more
                let mut frag = self.compile_node(node)?;
                for _ in 1..n - 1 {
                    let next = self.compile_node(node)?;
                    self.patch(&frag.outs, next.start);
                    frag.outs = next.outs;
                }
                let plus = self.compile_plus(node)?;
                self.patch(&frag.outs, plus.start);
                Ok(Frag {
                    start: frag.start,
                    outs: plus.outs,
                })
            }
            (n, Some(m)) => {
                // n mandatory copies, then m-n optional ones; each optional
                // copy can bail straight to the end.
                let mut start = None;
                let mut dangling: Vec<Slot> = Vec::new();
                let mut prev_outs: Vec<Slot> = Vec::new();
                for _ in 0..n {
                    let frag = self.compile_node(node)?;
                    if start.is_some() {
                        self.patch(&prev_outs, frag.start);
                    } else {
                        start = Some(frag.start);
                    }
                    prev_outs = frag.outs;
                }
                for _ in n..m {
                    let split_s = self.push(State::new(StateKind::Split))?;
                    let frag = self.compile_node(node)?;
                    self.states[split_s as usize].out = frag.start;
                    if start.is_some() {
                        self.patch(&prev_outs, split_s);
                    } else {
                        start = Some(split_s);
                    }
                    dangling.push(Slot::Out2(split_s));
                    prev_outs = frag.outs;
                }
                dangling.extend(prev_outs);
                match start {
                    Some(start) => Ok(Frag {
                        start,
                        outs: dangling,
                    }),
                    None => self.compile_node(&Ast::Empty),
                }
            }
        }
    }

    fn compile_star(&mut self, node: &Ast) -> Result<Frag, CompileError> {
        let split_s = self.push(State::new(StateKind::Split))?;
        let body = self.compile_node(node)?;
        self.states[split_s as usize].out = body.start;
        self.patch(&body.outs, split_s);
        Ok(Frag {
            start: split_s,
            outs: vec![Slot::Out2(split_s)],
        })
    }

    fn compile_plus(&mut self, node: &Ast) -> Result<Frag, CompileError> {
        let body = self.compile_node(node)?;
        let split_s = self.push(State::new(StateKind::Split))?;
        self.states[split_s as usize].out = body.start;
        self.patch(&body.outs, split_s);
        Ok(Frag {
            start: body.start,
            outs: vec![Slot::Out2(split_s)],
        })
    }

    fn compile_question(&mut self, node: &Ast) -> Result<Frag, CompileError> {
        let split_s = self.push(State::new(StateKind::Split))?;
        let body = self.compile_node(node)?;
        self.states[split_s as usize].out = body.start;
        let mut outs = body.outs;
        outs.push(Slot::Out2(split_s));
        Ok(Frag {
            start: split_s,
            outs,
        })
    }
}

/// Header flag bits of the packed GPU table.
pub const HDR_ANCHORED_START: u32 = 0x1;
pub const HDR_ANCHORED_END: u32 = 0x2;
pub const HDR_CASE_INSENSITIVE: u32 = 0x4;

/// Per-state flag bits of the packed GPU layout.
const ST_CASE_INSENSITIVE: u8 = 0x1;
const ST_NEGATED: u8 = 0x2;

/// The NFA serialized for device execution: a 16-byte header, 12 bytes per
/// state and an 8-words-per-class bitmap pool. Byte offsets are contractual;
/// the kernels read these buffers as raw little-endian words.
#[derive(Debug, Clone)]
pub struct GpuRegexTable {
    pub num_states: u32,
    pub start_state: u32,
    pub num_groups: u32,
    pub flags: u32,
    /// 12 bytes per state.
    pub states: Vec<u8>,
    /// 8 x u32 per character class.
    pub bitmaps: Vec<u32>,
}

impl GpuRegexTable {
    pub fn header_words(&self) -> [u32; 4] {
        [self.num_states, self.start_state, self.num_groups, self.flags]
    }
}

impl CompiledRegex {
    /// Packs the automaton into the device layout.
    pub fn gpu_table(&self) -> GpuRegexTable {
        let mut states = Vec::with_capacity(self.states.len() * 12);
        for st in &self.states {
            let mut flags = 0u8;
            if st.case_insensitive {
                flags |= ST_CASE_INSENSITIVE;
            }
            if st.negated {
                flags |= ST_NEGATED;
            }
            let bitmap_offset: u32 = if st.class == NO_EDGE {
                0
            } else {
                st.class as u32 * 8
            };
            states.push(st.kind as u8);
            states.push(flags);
            states.extend_from_slice(&st.out.to_le_bytes());
            states.extend_from_slice(&st.out2.to_le_bytes());
            states.push(st.byte);
            states.push(st.group);
            states.extend_from_slice(&bitmap_offset.to_le_bytes());
        }

        let mut bitmaps = Vec::with_capacity(self.classes.len() * 8);
        for class in &self.classes {
            bitmaps.extend_from_slice(class);
        }
        if bitmaps.is_empty() {
            // the kernels bind this buffer unconditionally
            bitmaps.extend_from_slice(&[0u32; 8]);
        }

        let mut flags = 0u32;
        if self.anchored_start {
            flags |= HDR_ANCHORED_START;
        }
        if self.anchored_end {
            flags |= HDR_ANCHORED_END;
        }
        if self.case_insensitive {
            flags |= HDR_CASE_INSENSITIVE;
        }

        GpuRegexTable {
            num_states: self.states.len() as u32,
            start_state: self.start as u32,
            num_groups: self.num_groups as u32,
            flags,
            states,
            bitmaps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_ere(pat: &str) -> CompiledRegex {
        let options = SearchOptions {
            extended: true,
            ..Default::default()
        };
        CompiledRegex::compile(pat.as_bytes(), &options).unwrap()
    }

    #[test]
    fn test_single_literal_shape() {
        let re = compile_ere("a");
        assert_eq!(re.states.len(), 2);
        let s = re.states[re.start as usize];
        assert_eq!(s.kind, StateKind::Literal);
        assert_eq!(s.byte, b'a');
        assert_eq!(re.states[s.out as usize].kind, StateKind::Match);
    }

    #[test]
    fn test_alternation_has_split() {
        let re = compile_ere("a|b");
        assert_eq!(re.states[re.start as usize].kind, StateKind::Split);
    }

    #[test]
    fn test_group_markers() {
        let re = compile_ere("(ab)");
        assert_eq!(re.num_groups, 1);
        assert_eq!(re.states[re.start as usize].kind, StateKind::GroupStart);
        assert!(re
            .states
            .iter()
            .any(|s| s.kind == StateKind::GroupEnd && s.group == 0));
    }

    #[test]
    fn test_anchor_flags() {
        let re = compile_ere("^abc$");
        assert!(re.anchored_start);
        assert!(re.anchored_end);
        let re = compile_ere("abc");
        assert!(!re.anchored_start);
        assert!(!re.anchored_end);
    }

    #[test]
    fn test_interval_unrolls() {
        let re2 = compile_ere("a{2}");
        let re5 = compile_ere("a{5}");
        assert!(re5.states.len() > re2.states.len());
    }

    #[test]
    fn test_state_cap() {
        // 600 * 8 copies of a literal exceeds 4096 states
        let pat = "a{600}".repeat(8);
        let options = SearchOptions {
            extended: true,
            ..Default::default()
        };
        let err = CompiledRegex::compile(pat.as_bytes(), &options).unwrap_err();
        assert!(matches!(err, CompileError::PatternTooComplex(_)));
    }

    #[test]
    fn test_bre_default_syntax() {
        // in BRE, bare parens are literal and \( \) group
        let options = SearchOptions::default();
        let re = CompiledRegex::compile(br"(a)", &options).unwrap();
        assert_eq!(re.num_groups, 0);
        let re = CompiledRegex::compile(br"\(a\)", &options).unwrap();
        assert_eq!(re.num_groups, 1);
    }

    #[test]
    fn test_gpu_packing_layout() {
        let re = compile_ere("a");
        let table = re.gpu_table();
        assert_eq!(table.num_states, 2);
        assert_eq!(table.states.len(), 24);
        // state 0: literal 'a'
        assert_eq!(table.states[0], StateKind::Literal as u8);
        assert_eq!(table.states[6], b'a');
        let out = u16::from_le_bytes([table.states[2], table.states[3]]);
        assert_eq!(out, 1);
        // state 1: match with no out edges
        assert_eq!(table.states[12], StateKind::Match as u8);
        let out = u16::from_le_bytes([table.states[14], table.states[15]]);
        assert_eq!(out, NO_EDGE);
        // empty class pool still carries one zeroed bitmap
        assert_eq!(table.bitmaps.len(), 8);
    }

    #[test]
    fn test_gpu_packing_class_offsets() {
        let re = compile_ere("[a-c][0-9]");
        let table = re.gpu_table();
        assert_eq!(table.bitmaps.len(), 16);
        // second class state points at word offset 8
        let class_states: Vec<usize> = re
            .states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.kind == StateKind::Class)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(class_states.len(), 2);
        let off = |i: usize| {
            u32::from_le_bytes([
                table.states[i * 12 + 8],
                table.states[i * 12 + 9],
                table.states[i * 12 + 10],
                table.states[i * 12 + 11],
            ])
        };
        assert_eq!(off(class_states[0]), 0);
        assert_eq!(off(class_states[1]), 8);
    }

    #[test]
    fn test_case_insensitive_folds_classes() {
        let options = SearchOptions {
            extended: true,
            case_insensitive: true,
            ..Default::default()
        };
        let re = CompiledRegex::compile(b"[a-c]", &options).unwrap();
        let bits = re.classes[0];
        let has = |b: u8| bits[(b >> 5) as usize] & (1 << (b & 31)) != 0;
        assert!(has(b'a') && has(b'A') && has(b'C'));
    }
}
