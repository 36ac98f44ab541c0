//! SuperTux profile/score log.
//!
//! The file is a nested s-expression document. It is read into a tree first,
//! then level nodes are located and their statistics extracted:
//!
//! ```text
//! ("world1/level3.stl"
//!   (solved #t)
//!   (statistics
//!     (coins-collected 156)
//!     (badguys-killed 12)
//!     (time-needed 142.8)
//!     (secrets-found 2)))
//! ```
//!
//! Only solved levels produce records.

use crate::parser::{is_mangled, parse_number, parse_seconds, ParseReport, SkipReason};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuperTuxRecord {
    pub username: String,
    pub level: String,
    pub coins: u32,
    pub secrets: u32,
    /// Seconds
    pub time: f64,
    pub kills: u32,
    pub is_anomaly: bool,
}

/// Lists nested deeper than this are flattened into their ancestor at the
/// limit. Real profiles stay well under ten levels.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Atom(String),
    Str(String),
    List { items: Vec<Node>, line: usize },
}

impl Node {
    /// Text of an atom or string.
    fn text(&self) -> Option<&str> {
        match self {
            Node::Atom(s) | Node::Str(s) => Some(s),
            Node::List { .. } => None,
        }
    }

    fn items(&self) -> &[Node] {
        match self {
            Node::List { items, .. } => items,
            _ => &[],
        }
    }

    fn head(&self) -> Option<&str> {
        self.items().first().and_then(Node::text)
    }

    /// First child list whose head is `name`.
    fn child(&self, name: &str) -> Option<&Node> {
        self.items()
            .iter()
            .find(|n| matches!(n, Node::List { .. }) && n.head() == Some(name))
    }

    /// Value of a `(name value)` child.
    fn child_value(&self, name: &str) -> Option<&str> {
        self.child(name)
            .and_then(|n| n.items().get(1))
            .and_then(Node::text)
    }
}

/// The document as top-level nodes.
#[derive(Debug, Default)]
struct Tree {
    nodes: Vec<Node>,
    /// Line of the first list opened past [`MAX_DEPTH`]
    too_deep: Option<usize>,
}

/// Read the document into top-level nodes.
///
/// Unbalanced input is tolerated: stray `)` are ignored and lists still
/// open at end of input are closed. Nesting is capped at [`MAX_DEPTH`].
fn read_tree(text: &str) -> Tree {
    let mut stack: Vec<(Vec<Node>, usize)> = Vec::new();
    let mut top: Vec<Node> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1;
    // Opens past the cap that have not been closed yet.
    let mut overflow = 0usize;
    let mut too_deep = None;

    fn push(stack: &mut [(Vec<Node>, usize)], top: &mut Vec<Node>, node: Node) {
        match stack.last_mut() {
            Some((items, _)) => items.push(node),
            None => top.push(node),
        }
    }

    while let Some(c) = chars.next() {
        match c {
            '\n' => line += 1,
            c if c.is_whitespace() => {}
            ';' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            '(' if stack.len() >= MAX_DEPTH => {
                overflow += 1;
                too_deep.get_or_insert(line);
            }
            '(' => stack.push((Vec::new(), line)),
            ')' if overflow > 0 => overflow -= 1,
            ')' => {
                if let Some((items, start)) = stack.pop() {
                    push(&mut stack, &mut top, Node::List { items, line: start });
                }
            }
            '"' => {
                let mut s = String::new();
                while let Some(c) = chars.next() {
                    match c {
                        '"' => break,
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                s.push(match escaped {
                                    'n' => '\n',
                                    other => other,
                                });
                            }
                        }
                        '\n' => {
                            line += 1;
                            s.push(c);
                        }
                        _ => s.push(c),
                    }
                }
                push(&mut stack, &mut top, Node::Str(s));
            }
            _ => {
                let mut atom = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || matches!(next, '(' | ')' | '"' | ';') {
                        break;
                    }
                    atom.push(next);
                    chars.next();
                }
                push(&mut stack, &mut top, Node::Atom(atom));
            }
        }
    }

    while let Some((items, start)) = stack.pop() {
        push(&mut stack, &mut top, Node::List { items, line: start });
    }

    Tree {
        nodes: top,
        too_deep,
    }
}

fn is_level(node: &Node) -> bool {
    matches!(node, Node::List { .. })
        && node.head().is_some_and(|h| h.ends_with(".stl"))
}

/// Level nodes in document order. Levels are not searched for nested levels.
fn collect_levels(nodes: &[Node]) -> Vec<&Node> {
    let mut levels = Vec::new();
    let mut pending: Vec<&Node> = nodes.iter().rev().collect();
    while let Some(node) = pending.pop() {
        if is_level(node) {
            levels.push(node);
        } else if let Node::List { items, .. } = node {
            pending.extend(items.iter().rev());
        }
    }
    levels
}

/// Profile name from a `(name "...")` entry near the top of the document.
fn profile_name(nodes: &[Node]) -> Option<&str> {
    nodes.iter().find_map(|node| {
        node.child_value("name")
            .or_else(|| node.items().iter().find_map(|n| n.child_value("name")))
    })
    .filter(|name| !is_mangled(name))
}

/// Parse a SuperTux log. Records use the profile name when the document
/// has one, otherwise `player`.
pub fn parse(text: &str, player: &str) -> ParseReport<SuperTuxRecord> {
    let tree = read_tree(text);
    let username = profile_name(&tree.nodes).unwrap_or(player).to_string();

    let mut report = ParseReport::default();
    if let Some(line) = tree.too_deep {
        report.skip(line, SkipReason::TooDeep(MAX_DEPTH));
    }
    for level in collect_levels(&tree.nodes) {
        let line = match level {
            Node::List { line, .. } => *line,
            _ => 0,
        };
        if level.child_value("solved") != Some("#t") {
            continue;
        }
        match extract(level, &username) {
            Ok(record) => report.records.push(record),
            Err(reason) => report.skip(line, reason),
        }
    }
    report
}

fn extract(level: &Node, username: &str) -> Result<SuperTuxRecord, SkipReason> {
    let name = level.head().unwrap_or_default().to_string();
    if is_mangled(&name) {
        return Err(SkipReason::InvalidEncoding);
    }
    let stats = level
        .child("statistics")
        .ok_or(SkipReason::MissingField("statistics"))?;

    let field = |key: &'static str| stats.child_value(key).ok_or(SkipReason::MissingField(key));

    Ok(SuperTuxRecord {
        username: username.to_string(),
        level: name,
        coins: parse_number("coins-collected", field("coins-collected")?)?,
        secrets: parse_number("secrets-found", field("secrets-found")?)?,
        time: parse_seconds("time-needed", field("time-needed")?)?,
        kills: parse_number("badguys-killed", field("badguys-killed")?)?,
        is_anomaly: false,
    })
}
