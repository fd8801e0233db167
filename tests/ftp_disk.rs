//! FTP Disk Tests
//!
//! Runs the FTP connector against an in-process stub server speaking just
//! enough of the protocol: USER/PASS, TYPE, PASV data connections, RETR,
//! STOR, DELE, MKD/RMD, SIZE, MDTM, MLSD/MLST facts, RNFR/RNTO and
//! SITE CHMOD. Each test spawns its own server with its own in-memory tree.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use aerostore::{StorageManager, Visibility};
use serde_json::json;

// =============================================================================
// Stub server
// =============================================================================

#[derive(Default)]
struct Store {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    modes: HashMap<String, u32>,
}

impl Store {
    fn normalize(path: &str) -> String {
        path.trim_matches('/').to_string()
    }

    fn add_parents(&mut self, path: &str) {
        let mut built = String::new();
        if let Some((parents, _)) = path.rsplit_once('/') {
            for segment in parents.split('/') {
                if built.is_empty() {
                    built = segment.to_string();
                } else {
                    built = format!("{}/{}", built, segment);
                }
                self.dirs.insert(built.clone());
            }
        }
    }

    fn is_dir(&self, path: &str) -> bool {
        if path.is_empty() {
            return true;
        }
        let prefix = format!("{}/", path);
        self.dirs.contains(path)
            || self.files.keys().any(|k| k.starts_with(&prefix))
            || self.dirs.iter().any(|d| d.starts_with(&prefix))
    }

    /// Direct children of `path`: (name, is_dir, size)
    fn children(&self, path: &str) -> Vec<(String, bool, usize)> {
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };
        let mut dirs = BTreeSet::new();
        let mut files = BTreeMap::new();

        for (key, content) in &self.files {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((first, _)) => {
                    dirs.insert(first.to_string());
                }
                None if !rest.is_empty() => {
                    files.insert(rest.to_string(), content.len());
                }
                None => {}
            }
        }
        for dir in &self.dirs {
            let Some(rest) = dir.strip_prefix(&prefix) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            dirs.insert(rest.split('/').next().unwrap().to_string());
        }

        let mut out: Vec<(String, bool, usize)> =
            dirs.into_iter().map(|d| (d, true, 0)).collect();
        out.extend(files.into_iter().map(|(name, size)| (name, false, size)));
        out
    }

    fn facts_line(&self, path: &str) -> Option<String> {
        if let Some(content) = self.files.get(path) {
            let mode_fact = self
                .modes
                .get(path)
                .map(|m| format!("UNIX.mode=0{:o};", m))
                .unwrap_or_default();
            return Some(format!(
                "type=file;size={};modify=20260101120000;{} {}",
                content.len(),
                mode_fact,
                path
            ));
        }
        if self.is_dir(path) {
            return Some(format!("type=dir;modify=20260101120000; {}", path));
        }
        None
    }
}

fn send(ctrl: &mut TcpStream, line: &str) {
    let _ = ctrl.write_all(line.as_bytes());
    let _ = ctrl.write_all(b"\r\n");
}

fn accept_data(listener: &mut Option<TcpListener>) -> Option<TcpStream> {
    listener.take().and_then(|l| l.accept().ok()).map(|(s, _)| s)
}

fn handle_session(ctrl: TcpStream, store: &mut Store) {
    let mut reader = BufReader::new(match ctrl.try_clone() {
        Ok(clone) => clone,
        Err(_) => return,
    });
    let mut ctrl = ctrl;
    send(&mut ctrl, "220 stub FTP ready");

    let mut data_listener: Option<TcpListener> = None;
    let mut rename_from: Option<String> = None;

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let line = line.trim_end();
        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
        let path = Store::normalize(arg);

        match command.to_ascii_uppercase().as_str() {
            "USER" => send(&mut ctrl, "331 Password required"),
            "PASS" => send(&mut ctrl, "230 Logged in"),
            "TYPE" => send(&mut ctrl, "200 Binary it is"),
            "QUIT" => {
                send(&mut ctrl, "221 Bye");
                return;
            }
            "PASV" => {
                let listener = TcpListener::bind("127.0.0.1:0").expect("bind data listener");
                let port = listener.local_addr().unwrap().port();
                data_listener = Some(listener);
                send(
                    &mut ctrl,
                    &format!(
                        "227 Entering Passive Mode (127,0,0,1,{},{})",
                        port / 256,
                        port % 256
                    ),
                );
            }
            "STOR" => {
                send(&mut ctrl, "150 Opening data connection");
                let Some(mut data) = accept_data(&mut data_listener) else {
                    send(&mut ctrl, "425 No data connection");
                    continue;
                };
                let mut content = Vec::new();
                let _ = data.read_to_end(&mut content);
                drop(data);
                store.add_parents(&path);
                store.files.insert(path, content);
                send(&mut ctrl, "226 Transfer complete");
            }
            "RETR" => match store.files.get(&path).cloned() {
                Some(content) => {
                    send(&mut ctrl, "150 Opening data connection");
                    if let Some(mut data) = accept_data(&mut data_listener) {
                        let _ = data.write_all(&content);
                    }
                    send(&mut ctrl, "226 Transfer complete");
                }
                None => send(&mut ctrl, "550 File not found"),
            },
            "MLSD" => {
                if !store.is_dir(&path) {
                    send(&mut ctrl, "550 Not a directory");
                    continue;
                }
                send(&mut ctrl, "150 Opening data connection");
                if let Some(mut data) = accept_data(&mut data_listener) {
                    for (name, is_dir, size) in store.children(&path) {
                        let child = if path.is_empty() {
                            name.clone()
                        } else {
                            format!("{}/{}", path, name)
                        };
                        let line = if is_dir {
                            format!("type=dir;modify=20260101120000; {}\r\n", name)
                        } else {
                            let mode_fact = store
                                .modes
                                .get(&child)
                                .map(|m| format!("UNIX.mode=0{:o};", m))
                                .unwrap_or_default();
                            format!(
                                "type=file;size={};modify=20260101120000;{} {}\r\n",
                                size, mode_fact, name
                            )
                        };
                        let _ = data.write_all(line.as_bytes());
                    }
                }
                send(&mut ctrl, "226 Transfer complete");
            }
            "MLST" => match store.facts_line(&path) {
                Some(facts) => {
                    send(&mut ctrl, &format!("250-Listing {}", path));
                    send(&mut ctrl, &format!(" {}", facts));
                    send(&mut ctrl, "250 End");
                }
                None => send(&mut ctrl, "550 Not found"),
            },
            "SIZE" => match store.files.get(&path) {
                Some(content) => send(&mut ctrl, &format!("213 {}", content.len())),
                None => send(&mut ctrl, "550 Not a file"),
            },
            "MDTM" => match store.files.get(&path) {
                Some(_) => send(&mut ctrl, "213 20260101120000"),
                None => send(&mut ctrl, "550 Not a file"),
            },
            "DELE" => {
                if store.files.remove(&path).is_some() {
                    store.modes.remove(&path);
                    send(&mut ctrl, "250 Deleted");
                } else {
                    send(&mut ctrl, "550 File not found");
                }
            }
            "MKD" => {
                store.add_parents(&format!("{}/x", path));
                store.dirs.insert(path);
                send(&mut ctrl, "257 Created");
            }
            "RMD" => {
                if store.is_dir(&path) && store.children(&path).is_empty() {
                    store.dirs.remove(&path);
                    send(&mut ctrl, "250 Removed");
                } else {
                    send(&mut ctrl, "550 Not removable");
                }
            }
            "RNFR" => {
                if store.files.contains_key(&path) || store.is_dir(&path) {
                    rename_from = Some(path);
                    send(&mut ctrl, "350 Ready");
                } else {
                    send(&mut ctrl, "550 Not found");
                }
            }
            "RNTO" => match rename_from.take() {
                Some(from) => {
                    if let Some(content) = store.files.remove(&from) {
                        let mode = store.modes.remove(&from);
                        store.add_parents(&path);
                        if let Some(mode) = mode {
                            store.modes.insert(path.clone(), mode);
                        }
                        store.files.insert(path, content);
                        send(&mut ctrl, "250 Renamed");
                    } else {
                        send(&mut ctrl, "550 Source vanished");
                    }
                }
                None => send(&mut ctrl, "503 RNFR first"),
            },
            "SITE" => {
                let mut parts = arg.split_whitespace();
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(site), Some(mode), Some(target))
                        if site.eq_ignore_ascii_case("CHMOD") =>
                    {
                        let target = Store::normalize(target);
                        if store.files.contains_key(&target) || store.is_dir(&target) {
                            if let Ok(mode) = u32::from_str_radix(mode, 8) {
                                store.modes.insert(target, mode);
                                send(&mut ctrl, "200 Mode set");
                            } else {
                                send(&mut ctrl, "501 Bad mode");
                            }
                        } else {
                            send(&mut ctrl, "550 Not found");
                        }
                    }
                    _ => send(&mut ctrl, "501 Bad SITE command"),
                }
            }
            _ => send(&mut ctrl, "502 Not implemented"),
        }
    }
}

/// Spawn a stub server; sessions share one in-memory tree
fn spawn_server() -> u16 {
    let _ = env_logger::builder().is_test(true).try_init();
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind control listener");
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let mut store = Store::default();
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => handle_session(stream, &mut store),
                Err(_) => break,
            }
        }
    });
    port
}

fn ftp_manager(port: u16, throw: bool) -> StorageManager {
    StorageManager::from_value(json!({
        "default": "remote",
        "disks": {
            "remote": {
                "driver": "ftp",
                "host": "127.0.0.1",
                "port": port,
                "username": "tester",
                "password": "secret",
                "root": "site",
                "timeout_secs": 5,
                "throw": throw,
            }
        }
    }))
    .unwrap()
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_put_get_round_trip() {
    let port = spawn_server();
    let disk = ftp_manager(port, false).default_disk().unwrap();

    assert!(disk.put("docs/hello.txt", "hello ftp").unwrap());
    assert_eq!(
        disk.get_string("docs/hello.txt").unwrap().unwrap(),
        "hello ftp"
    );
    assert!(disk.file_exists("docs/hello.txt"));
    assert!(disk.directory_exists("docs"));
    assert!(disk.missing("docs/other.txt"));
}

#[test]
fn test_files_listing_is_sorted() {
    let port = spawn_server();
    let disk = ftp_manager(port, false).default_disk().unwrap();

    disk.put("dir/zeta.txt", "z").unwrap();
    disk.put("dir/alpha.txt", "a").unwrap();
    disk.put("dir/mid.txt", "m").unwrap();

    assert_eq!(
        disk.files("dir").unwrap(),
        vec!["dir/alpha.txt", "dir/mid.txt", "dir/zeta.txt"]
    );
}

#[test]
fn test_recursive_listing() {
    let port = spawn_server();
    let disk = ftp_manager(port, false).default_disk().unwrap();

    disk.put("a/top.txt", "1").unwrap();
    disk.put("a/sub/leaf.txt", "2").unwrap();

    assert_eq!(
        disk.all_files("a").unwrap(),
        vec!["a/sub/leaf.txt", "a/top.txt"]
    );
    assert_eq!(disk.directories("a").unwrap(), vec!["a/sub"]);
}

#[test]
fn test_visibility_round_trip() {
    let port = spawn_server();
    let disk = ftp_manager(port, false).default_disk().unwrap();
    disk.put("v.txt", "x").unwrap();

    // Without an advertised mode the file reads back private
    assert_eq!(disk.get_visibility("v.txt").unwrap(), Visibility::Private);

    for v in [Visibility::Public, Visibility::Private] {
        assert!(disk.set_visibility("v.txt", v).unwrap());
        assert_eq!(disk.get_visibility("v.txt").unwrap(), v);
    }
}

#[test]
fn test_delete_fail_soft_and_fail_fast() {
    let port = spawn_server();
    let manager = ftp_manager(port, false);
    let disk = manager.default_disk().unwrap();

    disk.put("gone.txt", "x").unwrap();
    assert!(disk.delete("gone.txt").unwrap());
    assert!(!disk.file_exists("gone.txt"));

    // Missing target reads as failure, swallowed into false
    assert!(!disk.delete("gone.txt").unwrap());
}

#[test]
fn test_rename_and_copy() {
    let port = spawn_server();
    let disk = ftp_manager(port, false).default_disk().unwrap();

    disk.put("orig.txt", "payload").unwrap();
    assert!(disk.rename("orig.txt", "moved/renamed.txt").unwrap());
    assert!(!disk.file_exists("orig.txt"));
    assert_eq!(
        disk.get_string("moved/renamed.txt").unwrap().unwrap(),
        "payload"
    );

    assert!(disk.copy("moved/renamed.txt", "copies/c.txt").unwrap());
    assert!(disk.file_exists("moved/renamed.txt"));
    assert_eq!(disk.get_string("copies/c.txt").unwrap().unwrap(), "payload");
}

#[test]
fn test_metadata() {
    let port = spawn_server();
    let disk = ftp_manager(port, false).default_disk().unwrap();
    disk.put("meta.txt", "12345").unwrap();

    assert_eq!(disk.size("meta.txt").unwrap(), Some(5));
    let modified = disk.last_modified("meta.txt").unwrap().unwrap();
    assert_eq!(modified.to_rfc3339(), "2026-01-01T12:00:00+00:00");
    assert_eq!(
        disk.mime_type("meta.txt").unwrap().as_deref(),
        Some("text/plain")
    );
    assert_eq!(disk.checksum("meta.txt").unwrap().unwrap().len(), 64);
}

#[test]
fn test_url_is_raw_prefixed_path() {
    let port = spawn_server();
    let disk = ftp_manager(port, false).default_disk().unwrap();
    assert_eq!(disk.url("pub/a.txt").unwrap(), "site/pub/a.txt");
    assert!(!disk.provides_temporary_urls());
}

#[test]
fn test_directories_lifecycle() {
    let port = spawn_server();
    let disk = ftp_manager(port, false).default_disk().unwrap();

    assert!(disk.make_directory("tree/branch").unwrap());
    assert!(disk.directory_exists("tree/branch"));

    disk.put("tree/branch/leaf.txt", "x").unwrap();
    assert!(disk.delete_directory("tree").unwrap());
    assert!(!disk.directory_exists("tree"));
    assert!(!disk.file_exists("tree/branch/leaf.txt"));
}
