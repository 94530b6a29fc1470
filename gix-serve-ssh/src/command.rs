//! Typed commands and the per-session table resolving command lines to them.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::Failure;

/// Every command the SSH transport can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// `git-upload-pack <repository>`
    UploadPack,
    /// `git-receive-pack <repository>`
    ReceivePack,
    /// `gc <repository> [--aggressive]`
    Gc,
    /// `keys add`
    KeysAdd,
    /// `keys remove`
    KeysRemove,
    /// `keys list`
    KeysList,
    /// `keys which`
    KeysWhich,
    /// `keys comment`
    KeysComment,
    /// `keys permission`
    KeysPermission,
}

/// A resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// What to run.
    pub kind: CommandKind,
    /// The canonical name, with the names of enclosing tables, like `keys list`.
    pub name: String,
    /// The arguments following the name.
    pub args: Vec<String>,
}

impl Command {
    /// The name followed by the arguments, as expected by argument parsers.
    pub fn argv(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.args.iter().map(String::as_str))
    }
}

/// Split `line` like a POSIX shell would.
pub fn split(line: &str) -> Result<Vec<String>, Failure> {
    shell_words::split(line).map_err(|err| Failure::new(format!("cannot parse command line: {err}")))
}

#[derive(Debug, Clone)]
enum Target {
    Command(CommandKind),
    Table(CommandTable),
}

#[derive(Debug, Clone)]
struct Entry {
    target: Target,
    description: String,
    admin: bool,
}

/// Named commands and nested tables available to one session.
///
/// Administrative entries are only added for administrators, so they can't be resolved by anyone else.
#[derive(Debug, Clone)]
pub struct CommandTable {
    name: String,
    admin: bool,
    entries: BTreeMap<String, Entry>,
    aliases: BTreeMap<String, String>,
}

impl CommandTable {
    /// Create an empty table called `name`, built for an administrator if `admin` is set.
    pub fn new(name: impl Into<String>, admin: bool) -> Self {
        CommandTable {
            name: name.into(),
            admin,
            entries: BTreeMap::new(),
            aliases: BTreeMap::new(),
        }
    }

    /// The name used in messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add the command `name`.
    pub fn command(mut self, name: &str, kind: CommandKind, description: &str) -> Self {
        self.insert(name, Target::Command(kind), description, false);
        self
    }

    /// Add the command `name` if this table is built for an administrator.
    pub fn admin_command(mut self, name: &str, kind: CommandKind, description: &str) -> Self {
        if self.admin {
            self.insert(name, Target::Command(kind), description, true);
        }
        self
    }

    /// Make `alias` resolve like `name`, if `name` is present.
    pub fn alias(mut self, alias: &str, name: &str) -> Self {
        if self.entries.contains_key(name) {
            self.aliases.insert(alias.to_owned(), name.to_owned());
        }
        self
    }

    /// Nest `table` under its name, unless it has no entries.
    pub fn table(mut self, table: CommandTable, description: &str) -> Self {
        if !table.is_empty() {
            let name = table.name.clone();
            self.insert(&name, Target::Table(table), description, false);
        }
        self
    }

    /// Return `true` if `name`, which may be an alias or a path like `keys add`, can be resolved.
    pub fn contains(&self, name: &str) -> bool {
        let mut table = self;
        let mut names = name.split_whitespace().peekable();
        while let Some(name) = names.next() {
            match table.lookup(name).map(|(_, entry)| &entry.target) {
                Some(Target::Table(nested)) => table = nested,
                Some(Target::Command(_)) => return names.peek().is_none(),
                None => return false,
            }
        }
        false
    }

    /// Resolve `argv` to a command, or fail with the usage text if it is empty, or a
    /// `<table>: <name>: not found` message if the name is unknown.
    pub fn resolve(&self, argv: Vec<String>) -> Result<Command, Failure> {
        self.resolve_in("", argv)
    }

    /// A listing of all entries, with administrative ones marked by `*`.
    pub fn usage(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}: available commands", self.name);
        self.write_entries(&mut out, "");
        if self.has_admin_entries() {
            out.push_str("\n* = administrator command\n");
        }
        out
    }

    fn insert(&mut self, name: &str, target: Target, description: &str, admin: bool) {
        self.entries.insert(
            name.to_owned(),
            Entry {
                target,
                description: description.to_owned(),
                admin,
            },
        );
    }

    fn lookup(&self, name: &str) -> Option<(&str, &Entry)> {
        let name = self.aliases.get(name).map_or(name, String::as_str);
        self.entries.get_key_value(name).map(|(name, entry)| (name.as_str(), entry))
    }

    fn resolve_in(&self, prefix: &str, argv: Vec<String>) -> Result<Command, Failure> {
        let mut argv = argv.into_iter();
        let Some(name) = argv.next() else {
            return Err(Failure::new(self.usage()));
        };
        let Some((canonical, entry)) = self.lookup(&name) else {
            return Err(Failure::new(format!("{}: {name}: not found", self.name)));
        };
        let qualified = format!("{prefix}{canonical}");
        match &entry.target {
            Target::Command(kind) => Ok(Command {
                kind: *kind,
                name: qualified,
                args: argv.collect(),
            }),
            Target::Table(table) => table.resolve_in(&format!("{qualified} "), argv.collect()),
        }
    }

    fn write_entries(&self, out: &mut String, prefix: &str) {
        let width = self.entries.keys().map(|name| prefix.len() + name.len()).max().unwrap_or(0);
        for (name, entry) in &self.entries {
            let marker = if entry.admin { '*' } else { ' ' };
            let aliases: Vec<_> = self
                .aliases
                .iter()
                .filter(|(_, target)| *target == name)
                .map(|(alias, _)| alias.as_str())
                .collect();
            let full = format!("{prefix}{name}");
            let _ = write!(out, "{marker} {full:<width$}  {}", entry.description);
            if !aliases.is_empty() {
                let _ = write!(out, " (alias: {})", aliases.join(", "));
            }
            out.push('\n');
            if let Target::Table(table) = &entry.target {
                table.write_entries(out, &format!("{full} "));
            }
        }
    }

    fn has_admin_entries(&self) -> bool {
        self.entries.values().any(|entry| match &entry.target {
            Target::Command(_) => entry.admin,
            Target::Table(table) => entry.admin || table.has_admin_entries(),
        })
    }
}
