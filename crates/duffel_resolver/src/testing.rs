//! Fixture builders shared by the test modules: tiny but structurally real
//! wheels, eggs, and sdists written into temporary directories.

use std::io::Write;
use std::path::{Path, PathBuf};

pub(crate) fn core_metadata(
    name: &str,
    version: &str,
    requires: &[&str],
    extras: &[&str],
) -> String {
    let mut metadata = format!("Metadata-Version: 2.1\nName: {name}\nVersion: {version}\n");
    for requirement in requires {
        metadata.push_str(&format!("Requires-Dist: {requirement}\n"));
    }
    for extra in extras {
        metadata.push_str(&format!("Provides-Extra: {extra}\n"));
    }
    metadata
}

/// Writes `{name}-{version}-{tags}.whl` containing a metadata file, returning
/// its path.
pub(crate) fn write_wheel(
    dir: &Path,
    name: &str,
    version: &str,
    requires: &[&str],
    extras: &[&str],
    tags: &str,
) -> PathBuf {
    let path = dir.join(format!("{name}-{version}-{tags}.whl"));
    let file = std::fs::File::create(&path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();

    writer
        .start_file(format!("{name}-{version}.dist-info/METADATA"), options)
        .unwrap();
    writer
        .write_all(core_metadata(name, version, requires, extras).as_bytes())
        .unwrap();
    writer
        .start_file(format!("{name}-{version}.dist-info/WHEEL"), options)
        .unwrap();
    writer.write_all(b"Wheel-Version: 1.0\n").unwrap();
    writer.finish().unwrap();
    path
}

/// Writes `{name}-{version}-{tags}.egg` with `EGG-INFO/PKG-INFO` and an
/// optional `EGG-INFO/requires.txt`.
pub(crate) fn write_egg(
    dir: &Path,
    name: &str,
    version: &str,
    tags: &str,
    requires_txt: Option<&str>,
) -> PathBuf {
    let path = dir.join(format!("{name}-{version}-{tags}.egg"));
    let file = std::fs::File::create(&path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();

    writer.start_file("EGG-INFO/PKG-INFO", options).unwrap();
    writer
        .write_all(core_metadata(name, version, &[], &[]).as_bytes())
        .unwrap();
    if let Some(requires) = requires_txt {
        writer.start_file("EGG-INFO/requires.txt", options).unwrap();
        writer.write_all(requires.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
    path
}

/// Writes `{name}-{version}.tar.gz` laid out like a real sdist.
pub(crate) fn write_sdist(dir: &Path, name: &str, version: &str) -> PathBuf {
    let path = dir.join(format!("{name}-{version}.tar.gz"));
    let file = std::fs::File::create(&path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let add = |builder: &mut tar::Builder<_>, entry: &str, payload: &[u8]| {
        let mut header = tar::Header::new_gnu();
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{name}-{version}/{entry}"), payload)
            .unwrap();
    };

    add(
        &mut builder,
        "PKG-INFO",
        core_metadata(name, version, &[], &[]).as_bytes(),
    );
    add(
        &mut builder,
        "setup.py",
        format!("from setuptools import setup\nsetup(name={name:?}, version={version:?})\n")
            .as_bytes(),
    );

    builder.into_inner().unwrap().finish().unwrap();
    path
}
