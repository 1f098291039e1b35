use std::fs;
use std::path::PathBuf;

use vane::http::auth::Credentials;
use vane::vfs::{EmbeddedFile, EmbeddedFs, Flags, NativeFs, OpenMode, RemovableMedia, Vfs};

static TABLE: &[EmbeddedFile] = &[
    EmbeddedFile::data("index.htm", b"embedded", Flags::HTML),
    EmbeddedFile::data("secret.htm", b"hidden", Flags::HTML.union(Flags::AUTH)),
];

fn scratch(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("vane-vfs-{label}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn read_all(vfs: &Vfs, name: &str) -> Option<Vec<u8>> {
    let mut resource = vfs.open(name, OpenMode::Read, 64)?;
    let mut out = Vec::new();
    loop {
        let pending = resource.pending().to_vec();
        resource.consume(pending.len());
        out.extend_from_slice(&pending);
        if resource.fill().unwrap() == 0 && resource.pending().is_empty() {
            break;
        }
    }
    Some(out)
}

#[test]
fn test_vfs_earlier_backend_wins() {
    let dir = scratch("priority");
    fs::write(dir.join("index.htm"), b"native").unwrap();
    fs::write(dir.join("other.htm"), b"native only").unwrap();

    let vfs = Vfs::new()
        .with_backend(EmbeddedFs::new(TABLE))
        .with_backend(NativeFs::new(&dir));

    assert_eq!(read_all(&vfs, "index.htm").unwrap(), b"embedded");
    assert_eq!(read_all(&vfs, "other.htm").unwrap(), b"native only");
    assert!(vfs.open("absent.htm", OpenMode::Read, 64).is_none());

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_vfs_reports_backend_names() {
    let vfs = Vfs::new()
        .with_backend(EmbeddedFs::new(TABLE))
        .with_backend(NativeFs::new("/nonexistent"));
    let names: Vec<_> = vfs.backends().map(|b| b.name()).collect();
    assert_eq!(names, vec!["embedded", "native"]);
}

#[test]
fn test_vfs_embedded_auth() {
    let vfs = Vfs::new().with_backend(EmbeddedFs::new(TABLE).with_credentials("guest", "tourist"));

    let public = vfs.open("index.htm", OpenMode::Read, 64).unwrap();
    assert_eq!(public.authenticate(&Credentials::default()), Some(true));

    let secret = vfs.open("secret.htm", OpenMode::Read, 64).unwrap();
    assert_eq!(secret.authenticate(&Credentials::default()), Some(false));
    let good = Credentials::from_header("Basic Z3Vlc3Q6dG91cmlzdA==");
    assert_eq!(secret.authenticate(&good), Some(true));
}

#[test]
fn test_vfs_embedded_is_read_only() {
    let vfs = Vfs::new().with_backend(EmbeddedFs::new(TABLE));
    assert!(vfs.open("index.htm", OpenMode::Write, 64).is_none());
    assert!(!vfs.remove("index.htm"));
}

#[test]
fn test_vfs_native_put_and_remove() {
    let dir = scratch("put");
    let vfs = Vfs::new().with_backend(NativeFs::new(&dir).writable(true));

    let mut upload = vfs.open("upload.txt", OpenMode::Write, 64).unwrap();
    upload.write_all(b"stored body").unwrap();
    drop(upload);

    assert_eq!(fs::read(dir.join("upload.txt")).unwrap(), b"stored body");
    assert_eq!(read_all(&vfs, "upload.txt").unwrap(), b"stored body");

    assert!(vfs.remove("upload.txt"));
    assert!(!dir.join("upload.txt").exists());

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_vfs_native_read_only_refuses_write() {
    let dir = scratch("ro");
    let vfs = Vfs::new().with_backend(NativeFs::new(&dir));

    assert!(vfs.open("upload.txt", OpenMode::Write, 64).is_none());
    assert!(!dir.join("upload.txt").exists());

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_vfs_native_refuses_escape() {
    let dir = scratch("escape");
    let vfs = Vfs::new().with_backend(NativeFs::new(dir.join("www")));

    assert!(vfs.open("../escape.txt", OpenMode::Read, 64).is_none());
    assert!(vfs.open("/etc/passwd", OpenMode::Read, 64).is_none());

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_vfs_media_matches_ignoring_case() {
    let dir = scratch("media");
    fs::create_dir_all(dir.join("DOCS")).unwrap();
    fs::write(dir.join("DOCS").join("Readme.TXT"), b"card").unwrap();

    let media = RemovableMedia::new(&dir);
    assert!(media.is_mounted());
    let vfs = Vfs::new().with_backend(media);

    assert_eq!(read_all(&vfs, "docs/readme.txt").unwrap(), b"card");
    assert!(vfs.open("docs/readme.txt", OpenMode::Write, 64).is_none());

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_vfs_media_unmounted() {
    let media = RemovableMedia::new("/nonexistent/card");
    assert!(!media.is_mounted());
    let vfs = Vfs::new().with_backend(media);
    assert!(vfs.open("readme.txt", OpenMode::Read, 64).is_none());
}

#[test]
fn test_resource_size() {
    let vfs = Vfs::new().with_backend(EmbeddedFs::new(TABLE));
    let resource = vfs.open("index.htm", OpenMode::Read, 64).unwrap();
    assert_eq!(resource.size().unwrap(), 8);
    assert_eq!(resource.name(), "index.htm");
    assert!(resource.embedded().is_some());
}
