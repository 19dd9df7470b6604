//! A plain-text Transform Primitive, in which a change is a sequence of retain, insert, and delete
//! components, walked from the start of the document. Text past the last component is retained.

use oplog_rs::transform::{Transform, TransformError};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Component {
    Retain(usize),
    Insert(String),
    Delete(usize),
}

pub(crate) type TextChange = Vec<Component>;

/// Insert `text` at character offset `pos`.
pub(crate) fn insert(pos: usize, text: &str) -> TextChange {
    let mut change = Builder::default();
    change.retain(pos);
    change.insert(text);
    change.finish()
}

/// Delete `len` characters starting at character offset `pos`.
pub(crate) fn delete(pos: usize, len: usize) -> TextChange {
    let mut change = Builder::default();
    change.retain(pos);
    change.delete(len);
    change.finish()
}

pub(crate) fn apply(doc: &str, change: &[Component]) -> String {
    let chars: Vec<char> = doc.chars().collect();
    let mut pos = 0;
    let mut out = String::with_capacity(doc.len());
    for component in change {
        match component {
            Component::Retain(n) => {
                let end = (pos + n).min(chars.len());
                out.extend(&chars[pos.min(end)..end]);
                pos += n;
            }
            Component::Insert(text) => out.push_str(text),
            Component::Delete(n) => pos += n,
        }
    }
    if pos < chars.len() {
        out.extend(&chars[pos..]);
    }
    out
}

/// Every Delete and Retain in a change must stay within the document it applies to.
pub(crate) fn fits(doc: &str, change: &[Component]) -> bool {
    let span: usize = change
        .iter()
        .map(|component| match component {
            Component::Retain(n) | Component::Delete(n) => *n,
            Component::Insert(_) => 0,
        })
        .sum();
    span <= doc.chars().count()
}

#[derive(Clone, Debug, Default)]
pub(crate) struct TextOT;

impl Transform for TextOT {
    type Change = TextChange;

    /// Inserts of `a` go before inserts of `b` at the same offset.
    fn transform(
        &self,
        a: &TextChange,
        b: &TextChange,
    ) -> Result<(TextChange, TextChange), TransformError> {
        let (mut a_iter, mut b_iter) = (Cursor::new(a)?, Cursor::new(b)?);
        let (mut a_prime, mut b_prime) = (Builder::default(), Builder::default());

        loop {
            match (a_iter.peek(), b_iter.peek()) {
                (Piece::End, Piece::End) => break,
                (Piece::Insert(text), _) => {
                    b_prime.retain(text.chars().count());
                    a_prime.insert(&text);
                    a_iter.consume(usize::MAX);
                }
                (_, Piece::Insert(text)) => {
                    a_prime.retain(text.chars().count());
                    b_prime.insert(&text);
                    b_iter.consume(usize::MAX);
                }
                (a_piece, b_piece) => {
                    let len = a_piece.len().min(b_piece.len());
                    match (a_piece, b_piece) {
                        (Piece::Delete(_), Piece::Delete(_)) => (),
                        (Piece::Delete(_), _) => a_prime.delete(len),
                        (_, Piece::Delete(_)) => b_prime.delete(len),
                        _ => {
                            a_prime.retain(len);
                            b_prime.retain(len);
                        }
                    }
                    a_iter.consume(len);
                    b_iter.consume(len);
                }
            }
        }

        Ok((a_prime.finish(), b_prime.finish()))
    }

    fn compose(&self, changes: &[TextChange]) -> Result<TextChange, TransformError> {
        let (first, rest) = changes.split_first().ok_or(TransformError::EmptyCompose)?;
        rest.iter()
            .try_fold(first.clone(), |composed, next| compose_two(&composed, next))
    }
}

fn compose_two(a: &[Component], b: &[Component]) -> Result<TextChange, TransformError> {
    let (mut a_iter, mut b_iter) = (Cursor::new(a)?, Cursor::new(b)?);
    let mut composed = Builder::default();

    loop {
        match (a_iter.peek(), b_iter.peek()) {
            (Piece::End, Piece::End) => break,
            (Piece::Delete(n), _) => {
                composed.delete(n);
                a_iter.consume(n);
            }
            (_, Piece::Insert(text)) => {
                composed.insert(&text);
                b_iter.consume(usize::MAX);
            }
            (a_piece, b_piece) => {
                let len = a_piece.len().min(b_piece.len());
                match (a_piece, b_piece) {
                    (Piece::Insert(_), Piece::Delete(_)) => (),
                    (Piece::Insert(text), _) => {
                        composed.insert(&text.chars().take(len).collect::<String>())
                    }
                    (_, Piece::Delete(_)) => composed.delete(len),
                    _ => composed.retain(len),
                }
                a_iter.consume(len);
                b_iter.consume(len);
            }
        }
    }

    Ok(composed.finish())
}

/// The part of a component that a [`Cursor`] has not consumed yet. Past the last component, a change
/// retains forever, which is what `End` stands for when paired with anything but another `End`.
enum Piece {
    Retain(usize),
    Insert(String),
    Delete(usize),
    End,
}

impl Piece {
    fn len(&self) -> usize {
        match self {
            Piece::Retain(n) | Piece::Delete(n) => *n,
            Piece::Insert(text) => text.chars().count(),
            Piece::End => usize::MAX,
        }
    }
}

struct Cursor<'a> {
    components: &'a [Component],
    index: usize,
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(components: &'a [Component]) -> Result<Self, TransformError> {
        let empty = components.iter().any(|component| match component {
            Component::Retain(n) | Component::Delete(n) => *n == 0,
            Component::Insert(text) => text.is_empty(),
        });
        if empty {
            return Err(TransformError::Conflict("empty component".to_string()));
        }
        Ok(Self {
            components,
            index: 0,
            offset: 0,
        })
    }

    fn peek(&self) -> Piece {
        match self.components.get(self.index) {
            None => Piece::End,
            Some(Component::Retain(n)) => Piece::Retain(n - self.offset),
            Some(Component::Delete(n)) => Piece::Delete(n - self.offset),
            Some(Component::Insert(text)) => Piece::Insert(text.chars().skip(self.offset).collect()),
        }
    }

    fn consume(&mut self, len: usize) {
        let remaining = self.peek().len();
        if remaining == usize::MAX {
            return;
        }
        if len >= remaining {
            self.index += 1;
            self.offset = 0;
        } else {
            self.offset += len;
        }
    }
}

/// Accumulates components, merging neighbours of the same kind and dropping trailing retains.
#[derive(Default)]
struct Builder(TextChange);

impl Builder {
    fn retain(&mut self, n: usize) {
        if n == 0 || n == usize::MAX {
            return;
        }
        match self.0.last_mut() {
            Some(Component::Retain(last)) => *last += n,
            _ => self.0.push(Component::Retain(n)),
        }
    }

    fn insert(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.0.last_mut() {
            Some(Component::Insert(last)) => last.push_str(text),
            _ => self.0.push(Component::Insert(text.to_string())),
        }
    }

    fn delete(&mut self, n: usize) {
        if n == 0 || n == usize::MAX {
            return;
        }
        match self.0.last_mut() {
            Some(Component::Delete(last)) => *last += n,
            _ => self.0.push(Component::Delete(n)),
        }
    }

    fn finish(mut self) -> TextChange {
        while let Some(Component::Retain(_)) = self.0.last() {
            self.0.pop();
        }
        self.0
    }
}
