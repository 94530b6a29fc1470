mod util;

use std::path::Path;
use std::sync::Arc;

use gix_serve_core::{AccessPermission, Service, ServiceKind, ServiceRegistry};
use gix_serve_ssh::{
    keys::store::{FileKeyStore, KeyStore, MemoryKeyStore},
    CommandIo, CommandKind, SshKey, SshSession,
};
use pretty_assertions::assert_eq;
use util::{ed25519, run, Buffer, Fixture, Resolver, GIT_DIR};

fn key_with(permission: AccessPermission) -> SshKey {
    let mut key = SshKey::parse(&ed25519(1, "alice@laptop")).unwrap();
    key.set_permission(permission).unwrap();
    key
}

fn alice(permission: AccessPermission) -> SshSession {
    SshSession::new("alice").with_key(key_with(permission))
}

#[test]
fn upload_pack_streams_through_the_engine() {
    let fixture = Fixture::new(Resolver::default());
    let out = run(
        &fixture.dispatcher(alice(AccessPermission::Clone)),
        "git-upload-pack 'demo.git'",
        "want abc\n",
    );
    assert_eq!(out.code, 0, "{}", out.stderr);
    assert_eq!(out.stdout, "upload-pack demo.git\nwant abc\n");
    assert_eq!(out.stderr, "remote: serving alice\n");
    assert_eq!(fixture.resolver.opened(), ["demo.git"]);
    assert_eq!(fixture.resolver.released(), 1);
}

#[test]
fn sessions_without_key_are_left_to_the_resolver() {
    let fixture = Fixture::new(Resolver::default());
    let out = run(
        &fixture.dispatcher(SshSession::new("bob")),
        "git-upload-pack '/team/demo.git'",
        "",
    );
    assert_eq!(out.code, 0);
    assert_eq!(out.stdout, "upload-pack team/demo.git\n");
    assert_eq!(
        *fixture.resolver.opened.lock().unwrap(),
        [("bob".to_string(), "team/demo.git".to_string())]
    );
}

#[test]
fn upload_pack_needs_a_key_that_can_clone() {
    let fixture = Fixture::new(Resolver::default());
    let out = run(
        &fixture.dispatcher(alice(AccessPermission::View)),
        "git-upload-pack 'demo.git'",
        "",
    );
    assert_eq!(out.code, 1);
    assert!(out.stdout.is_empty());
    assert!(out.stderr.starts_with("alice does not have clone permission with key SHA256:"));
    assert!(fixture.resolver.opened().is_empty(), "the repository is never opened");
}

#[test]
fn revoked_stored_keys_authorize_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(
        tmp.path().join("mallory.keys"),
        format!("N {}\n", ed25519(4, "revoked")),
    )
    .unwrap();
    let key = FileKeyStore::read_only(tmp.path()).keys("mallory").unwrap().remove(0);
    assert_eq!(key.permission(), AccessPermission::None);

    let fixture = Fixture::new(Resolver {
        receive_override: Some(true),
        ..Default::default()
    });
    let dispatcher = fixture.dispatcher(SshSession::new("mallory").with_key(key));
    for (command, permission) in [("git-upload-pack", "clone"), ("git-receive-pack", "push")] {
        let out = run(&dispatcher, &format!("{command} 'demo.git'"), "");
        assert_eq!(out.code, 1, "{command}");
        assert!(out.stdout.is_empty(), "{command}");
        assert!(
            out.stderr
                .starts_with(&format!("mallory does not have {permission} permission with key SHA256:")),
            "{}",
            out.stderr
        );
    }
    assert!(fixture.resolver.opened().is_empty());
}

#[test]
fn receive_pack_needs_a_key_that_can_push() {
    let fixture = Fixture::with(
        Resolver::default(),
        ServiceRegistry::new([Service::new(ServiceKind::ReceivePack, true, false)]),
        Arc::new(MemoryKeyStore::default()),
    );
    let out = run(
        &fixture.dispatcher(alice(AccessPermission::Clone)),
        "git-receive-pack 'demo.git'",
        "",
    );
    assert_eq!(out.code, 1);
    assert!(out.stderr.contains("does not have push permission"));

    let out = run(
        &fixture.dispatcher(alice(AccessPermission::Push)),
        "git-receive-pack 'demo.git'",
        "",
    );
    assert_eq!(out.code, 0, "{}", out.stderr);
    assert_eq!(out.stdout, "receive-pack demo.git\n");
}

#[test]
fn disabled_services_fail_and_release_the_repository() {
    let fixture = Fixture::new(Resolver::default());
    let out = run(
        &fixture.dispatcher(alice(AccessPermission::Push)),
        "git-receive-pack 'demo.git'",
        "",
    );
    assert_eq!(out.code, 1);
    assert_eq!(out.stderr, "git-receive-pack is not enabled for demo.git\n");
    assert_eq!(fixture.resolver.opened(), ["demo.git"]);
    assert_eq!(fixture.resolver.released(), 1);

    let fixture = Fixture::new(Resolver {
        receive_override: Some(true),
        ..Default::default()
    });
    let out = run(
        &fixture.dispatcher(alice(AccessPermission::Push)),
        "git-receive-pack 'demo.git'",
        "",
    );
    assert_eq!(out.code, 0, "the repository enables push for itself");
}

#[test]
fn resolver_failures_are_reported_on_the_error_channel() {
    let fixture = Fixture::new(Resolver::default());
    let out = run(
        &fixture.dispatcher(alice(AccessPermission::Clone)),
        "git-upload-pack 'missing.git'",
        "",
    );
    assert_eq!(out.code, 1);
    assert_eq!(out.stderr, "repository not found: missing.git\n");

    let fixture = Fixture::new(Resolver {
        reject: Some("demo.git is busy, garbage collection in progress".into()),
        ..Default::default()
    });
    let out = run(
        &fixture.dispatcher(alice(AccessPermission::Clone)),
        "git-upload-pack 'demo.git'",
        "",
    );
    assert_eq!(out.code, 1);
    assert_eq!(out.stderr, "demo.git is busy, garbage collection in progress\n");
}

#[test]
fn unknown_commands_never_touch_repositories() {
    let fixture = Fixture::new(Resolver::default());
    let dispatcher = fixture.dispatcher(alice(AccessPermission::Push));
    let out = run(&dispatcher, "git-upload-archive 'demo.git'", "");
    assert_eq!(out.code, 1);
    assert_eq!(out.stderr, "gix-serve: git-upload-archive: not found\n");
    assert!(fixture.resolver.opened().is_empty());

    let out = run(&dispatcher, "", "");
    assert_eq!(out.code, 1);
    assert!(out.stderr.starts_with("gix-serve: available commands\n"));
}

#[test]
fn missing_arguments_are_usage_errors() {
    let fixture = Fixture::new(Resolver::default());
    let dispatcher = fixture.dispatcher(alice(AccessPermission::Push));
    let out = run(&dispatcher, "git-upload-pack", "");
    assert_eq!(out.code, 1);
    assert!(out.stderr.contains("Usage: git-upload-pack <REPOSITORY>"), "{}", out.stderr);

    let out = run(&dispatcher, "keys list --help", "");
    assert_eq!(out.code, 0, "help is not a failure");
    assert!(out.stderr.contains("-L"));
}

#[test]
fn gc_is_for_administrators_only() {
    let fixture = Fixture::new(Resolver::default());
    let user = fixture.dispatcher(alice(AccessPermission::Push));
    assert!(!user.commands().contains("gc"));
    let out = run(&user, "gc demo.git", "");
    assert_eq!(out.code, 1);
    assert_eq!(out.stderr, "gix-serve: gc: not found\n");
    assert!(fixture.collector.runs.lock().unwrap().is_empty());

    let admin = fixture.dispatcher(SshSession::new("root").with_admin(true));
    let out = run(&admin, "gc demo.git --aggressive", "");
    assert_eq!(out.code, 0, "{}", out.stderr);
    assert_eq!(
        out.stdout,
        "before: 12 loose objects (48 KiB), 0 packed objects in 0 packs (0 KiB)\n\
         after:  0 loose objects (0 KiB), 12 packed objects in 1 packs (4 KiB)\n"
    );
    assert_eq!(
        *fixture.collector.runs.lock().unwrap(),
        [("demo.git".to_string(), true)]
    );
    assert!(
        !fixture.collaborators.locks.is_collecting(Path::new(GIT_DIR)),
        "the lock is released"
    );
}

#[test]
fn gc_refuses_repositories_being_collected() {
    let fixture = Fixture::new(Resolver::default());
    let _lock = fixture.collaborators.locks.try_lock(Path::new(GIT_DIR)).unwrap();
    let admin = fixture.dispatcher(SshSession::new("root").with_admin(true));
    let out = run(&admin, "gc demo.git", "");
    assert_eq!(out.code, 1);
    assert_eq!(out.stderr, "demo.git is already being collected\n");
    assert!(fixture.collector.runs.lock().unwrap().is_empty());
    assert_eq!(fixture.resolver.released(), 1);
}

#[test]
fn commands_parse_into_kinds() {
    let fixture = Fixture::new(Resolver::default());
    let dispatcher = fixture.dispatcher(alice(AccessPermission::Push));
    let command = dispatcher.parse("keys rm 2 3").unwrap();
    assert_eq!(command.kind, CommandKind::KeysRemove);
    assert_eq!(command.name, "keys remove");
    assert_eq!(command.args, ["2", "3"]);
    assert_eq!(dispatcher.parse("git-receive-pack '/a b.git'").unwrap().args, ["/a b.git"]);
}

#[test]
fn each_invocation_runs_on_its_own_thread() {
    let fixture = Fixture::new(Resolver::default());
    let dispatcher = fixture.dispatcher(alice(AccessPermission::Clone));
    let outputs: Vec<_> = (0..3).map(|_| (Buffer::default(), Buffer::default())).collect();
    let tasks: Vec<_> = outputs
        .iter()
        .enumerate()
        .map(|(index, (stdout, stderr))| {
            let io = CommandIo::new(std::io::empty(), stdout.clone(), stderr.clone());
            dispatcher
                .start(&format!("git-upload-pack 'repo{index}.git'"), io)
                .unwrap()
        })
        .collect();
    for task in tasks {
        assert_eq!(task.wait(), 0);
    }
    for (index, (stdout, _)) in outputs.iter().enumerate() {
        assert_eq!(stdout.text(), format!("upload-pack repo{index}.git\n"));
    }
    assert_eq!(fixture.resolver.released(), 3);
}
