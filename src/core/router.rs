//! Segment trie dispatching `(verb, path)` pairs to handlers.
//!
//! Patterns are split on `/`, keeping the trailing slash attached to its
//! segment, so `/a` and `/a/` are different keys. A `*` segment matches any
//! single observed segment and records it as a capture.
//!
//! Registration happens on a [`RouterBuilder`]; [`RouterBuilder::build`]
//! consumes it and returns an immutable [`Router`] that can be shared across
//! connections without locking.
use std::{collections::HashMap, fmt, str::FromStr};

use thiserror::Error;

const VERB_COUNT: usize = 7;

/// The HTTP verbs the router recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Delete,
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
}

impl Verb {
    pub const ALL: [Verb; VERB_COUNT] = [
        Verb::Delete,
        Verb::Get,
        Verb::Head,
        Verb::Options,
        Verb::Patch,
        Verb::Post,
        Verb::Put,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Delete => "DELETE",
            Verb::Get => "GET",
            Verb::Head => "HEAD",
            Verb::Options => "OPTIONS",
            Verb::Patch => "PATCH",
            Verb::Post => "POST",
            Verb::Put => "PUT",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a request method is outside the recognised vocabulary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unrecognised HTTP verb: {0}")]
pub struct UnknownVerb(pub String);

impl FromStr for Verb {
    type Err = UnknownVerb;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Verb::ALL
            .into_iter()
            .find(|verb| verb.as_str() == s)
            .ok_or_else(|| UnknownVerb(s.to_string()))
    }
}

/// Outcome of a dispatch.
#[derive(Debug, PartialEq, Eq)]
pub enum Dispatch<'r, H> {
    /// A handler is registered for this verb; `captures` holds the wildcard
    /// segments left to right.
    Matched { handler: &'r H, captures: Vec<String> },
    /// No registered pattern matches the path.
    NotFound,
    /// The path matches but nothing is registered for the verb, or the verb
    /// is not recognised at all.
    MethodNotAllowed,
}

struct Node<H> {
    children: HashMap<String, Node<H>>,
    handlers: Option<[Option<H>; VERB_COUNT]>,
}

impl<H> Default for Node<H> {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
            handlers: None,
        }
    }
}

/// Split off the first key of `path`: everything up to and including the
/// first `/`, or the whole remainder when there is none.
fn split_key(path: &str) -> (&str, &str) {
    match path.find('/') {
        Some(ix) => path.split_at(ix + 1),
        None => (path, ""),
    }
}

fn is_wildcard(key: &str) -> bool {
    key == "*" || key == "*/"
}

impl<H> Node<H> {
    fn place(&mut self, path: &str) -> &mut Node<H> {
        if path.is_empty() {
            return self;
        }
        let (key, rest) = split_key(path);
        self.children.entry(key.to_string()).or_default().place(rest)
    }

    fn set(&mut self, verb: Verb, handler: H) {
        let handlers = self
            .handlers
            .get_or_insert_with(|| std::array::from_fn(|_| None));
        handlers[verb.index()] = Some(handler);
    }

    /// Find the node terminating `path`. Literal children win; the wildcard
    /// child is only tried when the literal branch does not reach a node with
    /// registered handlers. Captures pushed on an abandoned branch are undone.
    fn find<'a>(&'a self, path: &str, captures: &mut Vec<String>) -> Option<&'a Node<H>> {
        if path.is_empty() {
            return Some(self);
        }

        let (key, rest) = split_key(path);

        let literal = if is_wildcard(key) {
            None
        } else {
            self.children.get(key)
        };
        if let Some(child) = literal {
            let mark = captures.len();
            if let Some(found) = child.find(rest, captures).filter(|n| n.handlers.is_some()) {
                return Some(found);
            }
            captures.truncate(mark);
        }

        let wildcard = if key.ends_with('/') { "*/" } else { "*" };
        if let Some(child) = self.children.get(wildcard) {
            let mark = captures.len();
            captures.push(key.trim_end_matches('/').to_string());
            if let Some(found) = child.find(rest, captures).filter(|n| n.handlers.is_some()) {
                return Some(found);
            }
            captures.truncate(mark);
        }

        None
    }

    fn count(&self) -> usize {
        let own = self
            .handlers
            .as_ref()
            .map_or(0, |h| h.iter().filter(|h| h.is_some()).count());
        own + self.children.values().map(Node::count).sum::<usize>()
    }
}

/// Mutable registration side of the router.
pub struct RouterBuilder<H> {
    root: Node<H>,
}

impl<H> Default for RouterBuilder<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> RouterBuilder<H> {
    pub fn new() -> Self {
        Self {
            root: Node::default(),
        }
    }

    /// Register `handler` for `verb` on `pattern`. Registering the same pair
    /// twice replaces the earlier handler.
    pub fn handle(mut self, verb: Verb, pattern: &str, handler: H) -> Self {
        self.root.place(strip_root(pattern)).set(verb, handler);
        self
    }

    /// Freeze the trie. No further registration is possible on the result.
    pub fn build(self) -> Router<H> {
        let router = Router { root: self.root };
        tracing::debug!(handlers = router.root.count(), "Router built");
        router
    }
}

impl<H: Clone> RouterBuilder<H> {
    /// Register `handler` for every recognised verb on `pattern`.
    pub fn handle_all(mut self, pattern: &str, handler: H) -> Self {
        let node = self.root.place(strip_root(pattern));
        for verb in Verb::ALL {
            node.set(verb, handler.clone());
        }
        self
    }
}

fn strip_root(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// Immutable dispatcher produced by [`RouterBuilder::build`].
pub struct Router<H> {
    root: Node<H>,
}

impl<H> Router<H> {
    /// Start registering handlers.
    pub fn builder() -> RouterBuilder<H> {
        RouterBuilder::new()
    }

    /// Dispatch a raw request method. Unrecognised methods are rejected
    /// before the trie is consulted.
    pub fn dispatch(&self, method: &str, path: &str) -> Dispatch<'_, H> {
        match method.parse::<Verb>() {
            Ok(verb) => self.lookup(verb, path),
            Err(_) => Dispatch::MethodNotAllowed,
        }
    }

    pub fn lookup(&self, verb: Verb, path: &str) -> Dispatch<'_, H> {
        let mut captures = Vec::new();
        let Some(handlers) = self
            .root
            .find(strip_root(path), &mut captures)
            .and_then(|node| node.handlers.as_ref())
        else {
            return Dispatch::NotFound;
        };

        match &handlers[verb.index()] {
            Some(handler) => Dispatch::Matched { handler, captures },
            None => Dispatch::MethodNotAllowed,
        }
    }

    /// Verbs registered on the node `path` resolves to, for `Allow` headers.
    pub fn allowed(&self, path: &str) -> Vec<Verb> {
        let mut captures = Vec::new();
        self.root
            .find(strip_root(path), &mut captures)
            .and_then(|node| node.handlers.as_ref())
            .map(|handlers| {
                Verb::ALL
                    .into_iter()
                    .filter(|verb| handlers[verb.index()].is_some())
                    .collect()
            })
            .unwrap_or_default()
    }
}
