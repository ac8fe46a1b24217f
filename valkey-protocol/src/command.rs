use bytes::Bytes;

use crate::error::CommandError;

/// Which argv positions of a [`Command`] carry routable keys.
///
/// Mirrors the verb metadata table's `key_spec`: the first key sits at
/// `first`, the last at `last` (negative indices count
/// from the end of argv, as Valkey's `COMMAND INFO` reports them), and
/// further keys are spaced `step` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpec {
    /// Index of the first key argument, or `None` if the verb has no keys.
    pub first: Option<usize>,
    /// Index of the last key argument (inclusive). `-1` means "the last
    /// argument in argv".
    pub last: isize,
    /// Spacing between consecutive key arguments (1 for most commands; 2
    /// for interleaved key/value verbs like `MSET`).
    pub step: usize,
}

impl KeySpec {
    /// No routable keys (e.g. `PING`, `INFO`).
    pub const NONE: KeySpec = KeySpec { first: None, last: 0, step: 1 };

    /// A single key at a fixed argv position (the common case).
    pub const fn single(index: usize) -> KeySpec {
        KeySpec { first: Some(index), last: index as isize, step: 1 }
    }

    /// Every argument from `first` to the end of argv is a key, spaced by
    /// `step` (used by `MSET key1 val1 key2 val2 ...`-shaped commands).
    pub const fn range_to_end(first: usize, step: usize) -> KeySpec {
        KeySpec { first: Some(first), last: -1, step }
    }

    /// Resolves the key argument indices for a command whose argv has
    /// `argc` elements.
    pub fn key_indices(&self, argc: usize) -> Vec<usize> {
        let Some(first) = self.first else { return Vec::new() };
        if first >= argc {
            return Vec::new();
        }
        let last = if self.last < 0 {
            (argc as isize + self.last).max(first as isize) as usize
        } else {
            (self.last as usize).min(argc.saturating_sub(1))
        };
        if last < first || self.step == 0 {
            return Vec::new();
        }
        (first..=last).step_by(self.step).collect()
    }
}

/// An immutable, ordered argv — the unit of work the Router and
/// RequestEngine operate on.
///
/// `Command` is cheap to clone: argv elements are reference-counted
/// [`Bytes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    argv: Vec<Bytes>,
    key_indices: Vec<usize>,
}

impl Command {
    /// Starts building a command whose first argv element is `verb`.
    pub fn new(verb: impl Into<Bytes>) -> CommandBuilder {
        CommandBuilder { argv: vec![verb.into()], key_spec: KeySpec::NONE }
    }

    /// The verb (first argv element) as UTF-8, lossily if necessary.
    pub fn verb(&self) -> &[u8] {
        &self.argv[0]
    }

    /// The full argument vector, including the verb at index 0.
    pub fn argv(&self) -> &[Bytes] {
        &self.argv
    }

    /// Argv elements at the indices the command's [`KeySpec`] designated as
    /// keys.
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.key_indices.iter().map(move |&i| self.argv[i].as_ref())
    }

    /// Number of argv elements, including the verb.
    pub fn len(&self) -> usize {
        self.argv.len()
    }

    /// `true` if the command has no arguments at all (never constructible
    /// through [`Command::new`], but kept for API symmetry with `len`).
    pub fn is_empty(&self) -> bool {
        self.argv.is_empty()
    }
}

/// Fluent builder for a [`Command`], mirroring the chained-argument style
/// of request builders seen elsewhere in the ecosystem.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    argv: Vec<Bytes>,
    key_spec: KeySpec,
}

impl CommandBuilder {
    /// Appends a raw argument.
    pub fn arg(mut self, value: impl Into<Bytes>) -> Self {
        self.argv.push(value.into());
        self
    }

    /// Appends every element of `values` as a separate argument.
    pub fn args<I, T>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        self.argv.extend(values.into_iter().map(Into::into));
        self
    }

    /// Declares which argv positions are routable keys. Defaults to
    /// [`KeySpec::NONE`] if never called.
    pub fn key_spec(mut self, spec: KeySpec) -> Self {
        self.key_spec = spec;
        self
    }

    /// Finalizes the command.
    pub fn build(self) -> Result<Command, CommandError> {
        if self.argv.is_empty() {
            return Err(CommandError::Empty);
        }
        let key_indices = self.key_spec.key_indices(self.argv.len());
        Ok(Command { argv: self.argv, key_indices })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_key_spec_resolves_one_index() {
        let cmd = Command::new("GET").arg("foo").key_spec(KeySpec::single(1)).build().unwrap();
        let keys: Vec<&[u8]> = cmd.keys().collect();
        assert_eq!(keys, vec![b"foo".as_slice()]);
    }

    #[test]
    fn range_key_spec_resolves_interleaved_mset_keys() {
        let cmd = Command::new("MSET")
            .args(["k1", "v1", "k2", "v2"])
            .key_spec(KeySpec::range_to_end(1, 2))
            .build()
            .unwrap();
        let keys: Vec<&[u8]> = cmd.keys().collect();
        assert_eq!(keys, vec![b"k1".as_slice(), b"k2".as_slice()]);
    }

    #[test]
    fn no_key_spec_yields_no_keys() {
        let cmd = Command::new("PING").build().unwrap();
        assert_eq!(cmd.keys().count(), 0);
    }

    #[test]
    fn empty_builder_is_unreachable_but_guarded() {
        let builder = CommandBuilder { argv: Vec::new(), key_spec: KeySpec::NONE };
        assert_eq!(builder.build().unwrap_err(), CommandError::Empty);
    }
}
