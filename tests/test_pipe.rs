// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// TokenPipe: token accounting, stream helpers and named FIFOs.

use std::fs;
use std::io;
use std::path::PathBuf;

use pipe_ipc::{Process, TokenPipe};

fn temp_path(tag: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!("pipe_ipc_{}_{}", tag, std::process::id()));
    let _ = fs::remove_file(&p);
    p
}

#[test]
fn tokens_are_counted() {
    let pipe = TokenPipe::with_tokens(3).expect("pipe");
    assert!(pipe.try_take().expect("take"));
    pipe.put(2).expect("put");
    assert_eq!(pipe.drain().expect("drain"), 4);
    assert!(!pipe.try_take().expect("take"));
}

#[test]
fn try_read_on_empty_pipe_is_none() {
    let pipe = TokenPipe::new().expect("pipe");
    let mut buf = [0u8; 8];
    assert_eq!(pipe.try_read(&mut buf).expect("try_read"), None);
    pipe.write_all(b"abc").expect("write");
    assert_eq!(pipe.try_read(&mut buf).expect("try_read"), Some(3));
    assert_eq!(&buf[..3], b"abc");
}

#[test]
fn named_pipe_is_shared_by_path() {
    let path = temp_path("named");
    let a = TokenPipe::named(&path, true).expect("create fifo");
    let b = TokenPipe::named(&path, false).expect("open fifo");

    a.put(2).expect("put");
    assert!(b.try_take().expect("take"));
    assert!(a.try_take().expect("take"));
    assert!(!b.try_take().expect("take"));

    fs::remove_file(&path).expect("remove");
}

#[test]
fn named_pipe_reaches_unrelated_handle_in_child() {
    let path = temp_path("named_child");
    let parent = TokenPipe::named(&path, true).expect("create fifo");

    let child = Process::spawn(|| {
        let own = match TokenPipe::named(&path, false) {
            Ok(p) => p,
            Err(_) => return 1,
        };
        match own.write_all(b"hi") {
            Ok(()) => 0,
            Err(_) => 2,
        }
    })
    .expect("spawn");
    assert!(child.value().expect("value").success());

    let mut buf = [0u8; 2];
    parent.read_exact(&mut buf).expect("read");
    assert_eq!(&buf, b"hi");
    fs::remove_file(&path).expect("remove");
}

#[test]
fn named_rejects_regular_file() {
    let path = temp_path("regular");
    fs::write(&path, b"not a fifo").expect("write");
    let err = TokenPipe::named(&path, true).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    fs::remove_file(&path).expect("remove");
}

#[test]
fn named_without_create_requires_existing_path() {
    let path = temp_path("missing");
    let err = TokenPipe::named(&path, false).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
}
