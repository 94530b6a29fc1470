//! The `keys` commands, managing the public keys of the session user.

use std::io::{Read, Write};

use clap::Parser;
use gix_serve_core::AccessPermission;

use super::{store::StoreError, KeyError, SshKey};
use crate::{dispatch::Context, Command, CommandIo, Failure};

impl From<StoreError> for Failure {
    fn from(err: StoreError) -> Self {
        tracing::warn!(%err, "key store failed");
        Failure::new(format!("key store failed: {err}"))
    }
}

impl From<KeyError> for Failure {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::PrivateKey | KeyError::IllegalPermission(_) => Failure::new(err.to_string()),
            _ => Failure::new("The data read from STDIN can not be parsed as an SSH public key!"),
        }
    }
}

/// Add an SSH public key to your account.
#[derive(Debug, Parser)]
#[command(after_help = "Valid SSH public key permissions are: V, R, RW")]
struct AddArgs {
    /// Set the key access permission.
    #[arg(long, short = 'p', value_name = "PERMISSION")]
    permission: Option<String>,
    /// The key to add, read from STDIN if omitted.
    #[arg(value_name = "KEY", trailing_var_arg = true)]
    key: Vec<String>,
}

/// Remove an SSH public key from your account.
#[derive(Debug, Parser)]
struct RemoveArgs {
    /// The 1-based index of the key to remove as shown by `keys list`, or ALL.
    #[arg(value_name = "INDEX|ALL", required = true)]
    keys: Vec<String>,
}

/// List your registered SSH public keys.
#[derive(Debug, Parser)]
struct ListArgs {
    /// List complete public key parameters.
    #[arg(short = 'L')]
    raw: bool,
}

/// Display the SSH public key used for this session.
#[derive(Debug, Parser)]
struct WhichArgs {
    /// Show the complete public key parameters.
    #[arg(short = 'L')]
    raw: bool,
}

/// Set the comment for an SSH public key.
#[derive(Debug, Parser)]
struct CommentArgs {
    /// The key index.
    index: usize,
    /// The new comment.
    #[arg(required = true, trailing_var_arg = true)]
    comment: Vec<String>,
}

/// Set the permission of an SSH public key.
#[derive(Debug, Parser)]
struct PermissionArgs {
    /// The key index.
    index: usize,
    /// The new permission.
    permission: String,
}

fn println(out: &mut dyn Write, line: impl std::fmt::Display) -> Result<(), Failure> {
    writeln!(out, "{line}")?;
    out.flush()?;
    Ok(())
}

/// Apply `code` to `key`, ignoring levels at or below the floor.
fn apply_permission(key: &mut SshKey, code: &str) -> Result<(), Failure> {
    key.set_permission(AccessPermission::from_code(code))?;
    Ok(())
}

/// The keys named on the command line, or one key per non-comment line of `stdin`.
fn read_keys(args: Vec<String>, stdin: &mut dyn Read) -> Result<Vec<String>, Failure> {
    if !args.is_empty() {
        return Ok(vec![args.join(" ")]);
    }
    let mut text = String::new();
    stdin.read_to_string(&mut text)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToOwned::to_owned)
        .collect())
}

pub(crate) fn add(ctx: &Context, command: &Command, mut io: CommandIo) -> Result<(), Failure> {
    let args = AddArgs::try_parse_from(command.argv())?;
    let username = &ctx.session.username;
    let keys = read_keys(args.key, &mut io.stdin)?;
    if keys.is_empty() {
        return Err(Failure::new("No public keys were read from STDIN!"));
    }
    for raw in keys {
        let mut key = SshKey::parse(&raw)?;
        if let Some(code) = args.permission.as_deref().filter(|code| !code.is_empty()) {
            apply_permission(&mut key, code)?;
        }
        let fingerprint = key.fingerprint().to_owned();
        ctx.collaborators.keys.add_key(username, key)?;
        tracing::info!(user = %username, %fingerprint, "added SSH public key");
    }
    Ok(())
}

pub(crate) fn remove(ctx: &Context, command: &Command, mut io: CommandIo) -> Result<(), Failure> {
    const ALL: &str = "ALL";

    let args = RemoveArgs::try_parse_from(command.argv())?;
    let username = &ctx.session.username;
    let store = &ctx.collaborators.keys;
    let registered = store.keys(username)?;
    if registered.is_empty() {
        return Err(Failure::new("There are no registered keys!"));
    }

    if args.keys.iter().any(|key| key.eq_ignore_ascii_case(ALL)) {
        if store.remove_all_keys(username)? {
            tracing::info!(user = %username, "removed all SSH public keys");
            println(&mut io.stdout, "Removed all keys.")?;
        } else {
            tracing::warn!(user = %username, "failed to remove all SSH public keys");
        }
        return Ok(());
    }

    for parameter in &args.keys {
        let Some(index) = parameter.parse::<usize>().ok().filter(|index| *index > 0) else {
            tracing::warn!(user = %username, key = %parameter, "failed to remove SSH public key");
            return Err(Failure::new(format!("failed to remove key {parameter}")));
        };
        let Some(key) = registered.get(index - 1) else {
            return Err(Failure::new(if registered.len() == 1 {
                "Invalid index specified. There is only 1 registered key.".to_owned()
            } else {
                format!(
                    "Invalid index specified. There are {} registered keys.",
                    registered.len()
                )
            }));
        };
        if !store.remove_key(username, key)? {
            return Err(Failure::new(format!(
                "failed to remove #{parameter}: {}",
                key.fingerprint()
            )));
        }
        tracing::info!(user = %username, fingerprint = key.fingerprint(), "removed SSH public key");
        println(&mut io.stdout, format_args!("Removed {}", key.fingerprint()))?;
    }
    Ok(())
}

pub(crate) fn list(ctx: &Context, command: &Command, mut io: CommandIo) -> Result<(), Failure> {
    let args = ListArgs::try_parse_from(command.argv())?;
    let keys = ctx.collaborators.keys.keys(&ctx.session.username)?;
    if args.raw {
        for key in &keys {
            println(&mut io.stdout, key.raw_data())?;
        }
        return Ok(());
    }
    let rows: Vec<_> = keys.iter().enumerate().map(|(index, key)| row(index + 1, key)).collect();
    io.stdout.write_all(render_table(&rows).as_bytes())?;
    io.stdout.flush()?;
    Ok(())
}

pub(crate) fn which(ctx: &Context, command: &Command, mut io: CommandIo) -> Result<(), Failure> {
    let args = WhichArgs::try_parse_from(command.argv())?;
    let Some(key) = &ctx.session.key else {
        return Err(Failure::new("You have not authenticated with an SSH public key."));
    };
    if args.raw {
        return println(&mut io.stdout, key.raw_data());
    }
    let keys = ctx.collaborators.keys.keys(&ctx.session.username)?;
    let index = keys.iter().position(|registered| registered == key).map_or(0, |index| index + 1);
    io.stdout.write_all(render_table(&[row(index, key)]).as_bytes())?;
    io.stdout.flush()?;
    Ok(())
}

pub(crate) fn comment(ctx: &Context, command: &Command, mut io: CommandIo) -> Result<(), Failure> {
    let args = CommentArgs::try_parse_from(command.argv())?;
    let username = &ctx.session.username;
    let mut key = nth_key(ctx, args.index)?;
    key.set_comment(&args.comment.join(" "));
    ctx.collaborators.keys.add_key(username, key)?;
    println(
        &mut io.stdout,
        format_args!("Updated the comment for key #{}.", args.index),
    )
}

pub(crate) fn permission(ctx: &Context, command: &Command, mut io: CommandIo) -> Result<(), Failure> {
    let args = PermissionArgs::try_parse_from(command.argv())?;
    let username = &ctx.session.username;
    let mut key = nth_key(ctx, args.index)?;
    apply_permission(&mut key, &args.permission)?;
    ctx.collaborators.keys.add_key(username, key)?;
    println(
        &mut io.stdout,
        format_args!("Updated the permission for key #{}.", args.index),
    )
}

/// The key at the 1-based `index`.
fn nth_key(ctx: &Context, index: usize) -> Result<SshKey, Failure> {
    let mut keys = ctx.collaborators.keys.keys(&ctx.session.username)?;
    if index == 0 || index > keys.len() {
        return Err(Failure::new("Invalid key index!"));
    }
    Ok(keys.swap_remove(index - 1))
}

const HEADERS: [&str; 5] = ["#", "Fingerprint", "Comment", "Permission", "Type"];

fn row(index: usize, key: &SshKey) -> [String; 5] {
    [
        index.to_string(),
        key.fingerprint().to_owned(),
        key.comment().unwrap_or_default().to_owned(),
        key.permission().to_string(),
        key.algorithm().to_owned(),
    ]
}

/// Render `rows` below a header and a separator line, with columns separated by `|`.
fn render_table(rows: &[[String; 5]]) -> String {
    let mut widths = HEADERS.map(str::len);
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = table_line(HEADERS.iter().copied(), &widths);
    let rule: Vec<_> = widths.iter().map(|width| "-".repeat(width + 2)).collect();
    out.push_str(&rule.join("+"));
    out.push('\n');
    for row in rows {
        out.push_str(&table_line(row.iter().map(String::as_str), &widths));
    }
    out
}

fn table_line<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let cells: Vec<_> = cells
        .zip(widths.iter().copied())
        .map(|(cell, width)| format!(" {cell:<width$} "))
        .collect();
    format!("{}\n", cells.join("|").trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_columns_are_aligned() {
        let rows = [
            [
                "1".to_owned(),
                "SHA256:abc".to_owned(),
                "laptop".to_owned(),
                "RW".to_owned(),
                "ssh-ed25519".to_owned(),
            ],
            [
                "2".to_owned(),
                "SHA256:defgh".to_owned(),
                String::new(),
                "R".to_owned(),
                "ssh-rsa".to_owned(),
            ],
        ];
        let expected = [
            " # | Fingerprint  | Comment | Permission | Type",
            "---+--------------+---------+------------+-------------",
            " 1 | SHA256:abc   | laptop  | RW         | ssh-ed25519",
            " 2 | SHA256:defgh |         | R          | ssh-rsa",
            "",
        ]
        .join("\n");
        pretty_assertions::assert_eq!(render_table(&rows), expected);
    }

    #[test]
    fn keys_come_from_arguments_or_stdin() {
        let args = vec!["ssh-ed25519".to_owned(), "AAAA".to_owned(), "me".to_owned()];
        assert_eq!(read_keys(args, &mut std::io::empty()).unwrap(), ["ssh-ed25519 AAAA me"]);

        let mut stdin = "# mine\n\nssh-ed25519 AAAA one\r\n  ssh-ed25519 BBBB two \n".as_bytes();
        assert_eq!(
            read_keys(Vec::new(), &mut stdin).unwrap(),
            ["ssh-ed25519 AAAA one", "ssh-ed25519 BBBB two"]
        );
    }
}
