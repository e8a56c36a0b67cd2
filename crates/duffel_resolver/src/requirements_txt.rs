//! The requirements-file format.
//!
//! Line-oriented: blank lines and `#` comments are no-ops, `-`-prefixed lines
//! are option directives applied to a [`ResolverOptionsBuilder`], and
//! everything else is parsed as a resolvable. Directive values may follow the
//! flag after whitespace or `=`. Nested `-r` includes are read relative to
//! the file that names them.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use miette::Diagnostic;
use thiserror::Error;
use url::Url;

use crate::resolvable::{Resolvable, ResolvableError};
use crate::resolve::ResolverOptionsBuilder;
use crate::types::{Link, NormalizedPackageName};

/// Error produced while reading a requirements file.
#[derive(Debug, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum RequirementsTxtError {
    #[error("editable requirements are not supported: '{0}'")]
    EditableUnsupported(String),

    #[error("unsupported requirements line: '{0}'")]
    UnsupportedLine(String),

    #[error("failed to read requirements file")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolvable(#[from] ResolvableError),
}

/// Parses a requirements file, applying directives to `builder` and
/// returning the resolvables in file order.
pub fn requirements_from_file(
    path: &Path,
    builder: &mut ResolverOptionsBuilder,
) -> Result<Vec<Resolvable>, RequirementsTxtError> {
    let relative_to = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let contents = fs_err::read_to_string(path)?;
    requirements_from_lines(contents.lines(), builder, &relative_to)
}

/// Parses requirement lines with include paths resolved against
/// `relative_to`.
pub fn requirements_from_lines<'a>(
    lines: impl IntoIterator<Item = &'a str>,
    builder: &mut ResolverOptionsBuilder,
    relative_to: &Path,
) -> Result<Vec<Resolvable>, RequirementsTxtError> {
    let mut resolvables = Vec::new();
    for line in lines {
        resolvables.extend(process_line(line, builder, relative_to)?);
    }
    Ok(resolvables)
}

fn process_line(
    line: &str,
    builder: &mut ResolverOptionsBuilder,
    relative_to: &Path,
) -> Result<Vec<Resolvable>, RequirementsTxtError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(Vec::new());
    }
    if !line.starts_with('-') {
        return Ok(vec![Resolvable::parse(line)?]);
    }

    let (flag, value) = split_directive(line);
    match flag {
        "-e" | "--editable" => Err(RequirementsTxtError::EditableUnsupported(line.to_owned())),
        "-i" | "--index-url" => {
            builder.set_index(parse_url(line, value)?);
            Ok(Vec::new())
        }
        "--extra-index-url" => {
            builder.add_index(parse_url(line, value)?);
            Ok(Vec::new())
        }
        "-f" | "--find-links" => {
            let raw = required_value(line, value)?;
            let link = Link::wrap(raw)
                .map_err(|_| RequirementsTxtError::UnsupportedLine(line.to_owned()))?;
            builder.add_repository(link);
            Ok(Vec::new())
        }
        "--allow-external" => {
            builder.allow_external(parse_name(line, value)?);
            Ok(Vec::new())
        }
        "--allow-all-external" => {
            builder.allow_all_external();
            Ok(Vec::new())
        }
        "--allow-unverified" => {
            builder.allow_unverified(parse_name(line, value)?);
            Ok(Vec::new())
        }
        "--no-index" => {
            builder.clear_indices();
            Ok(Vec::new())
        }
        "--no-use-wheel" => {
            builder.no_use_wheel();
            Ok(Vec::new())
        }
        "-r" | "--requirement" => {
            let raw = required_value(line, value)?;
            let nested = relative_to.join(raw);
            requirements_from_file(&nested, builder)
        }
        _ => Err(RequirementsTxtError::UnsupportedLine(line.to_owned())),
    }
}

/// Splits a directive line into its flag and optional value; the separator is
/// either whitespace or a single `=`.
fn split_directive(line: &str) -> (&str, Option<&str>) {
    let split = line
        .find(|c: char| c.is_whitespace() || c == '=')
        .map(|idx| (&line[..idx], line[idx + 1..].trim()));
    match split {
        Some((flag, value)) if !value.is_empty() => (flag, Some(value)),
        Some((flag, _)) => (flag, None),
        None => (line, None),
    }
}

fn required_value<'a>(
    line: &str,
    value: Option<&'a str>,
) -> Result<&'a str, RequirementsTxtError> {
    value.ok_or_else(|| RequirementsTxtError::UnsupportedLine(line.to_owned()))
}

fn parse_url(line: &str, value: Option<&str>) -> Result<Url, RequirementsTxtError> {
    Url::parse(required_value(line, value)?)
        .map_err(|_| RequirementsTxtError::UnsupportedLine(line.to_owned()))
}

fn parse_name(
    line: &str,
    value: Option<&str>,
) -> Result<NormalizedPackageName, RequirementsTxtError> {
    NormalizedPackageName::from_str(required_value(line, value)?)
        .map_err(|_| RequirementsTxtError::UnsupportedLine(line.to_owned()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::resolve::ResolverOptions;

    fn parse(lines: &str) -> (Vec<Resolvable>, ResolverOptionsBuilder) {
        let mut builder = ResolverOptions::builder();
        let resolvables =
            requirements_from_lines(lines.lines(), &mut builder, Path::new(".")).unwrap();
        (resolvables, builder)
    }

    #[test]
    fn test_empty_and_comments() {
        let (resolvables, _) = parse("\n# a comment\n   \n");
        assert!(resolvables.is_empty());
    }

    #[test]
    fn test_line_types() {
        for separator in [' ', '='] {
            let input = format!(
                "simple_requirement\nspecific_requirement==2\n--allow-external{separator}specific_requirement\n"
            );
            let (resolvables, builder) = parse(&input);

            assert_eq!(resolvables.len(), 2);
            assert_eq!(resolvables[0].name().as_str(), "simple-requirement");
            assert!(!resolvables[0].exact());
            assert_eq!(resolvables[1].name().as_str(), "specific-requirement");
            assert!(resolvables[1].exact());

            let options = builder.build();
            assert!(options.allows_external(&"specific_requirement".parse().unwrap()));
            assert!(!options.allows_external(&"simple_requirement".parse().unwrap()));
        }
    }

    #[test]
    fn test_allow_all_external() {
        let (_, builder) = parse("simple\n--allow-all-external\n");
        assert!(builder.build().allows_external(&"anything".parse().unwrap()));
    }

    #[test]
    fn test_index_directives() {
        let (_, builder) = parse("--no-index\n");
        assert!(builder.build().fetchers.is_empty());

        for prefix in ["-f ", "--find-links ", "--find-links="] {
            let (_, builder) = parse(&format!("--no-index\n{prefix}https://example.com/repo\n"));
            let options = builder.build();
            assert_eq!(options.fetchers.len(), 1);
            assert_eq!(
                options.fetchers[0].links(&"foo".parse().unwrap())[0]
                    .url()
                    .as_str(),
                "https://example.com/repo"
            );
        }

        for prefix in [
            "-i ",
            "--index-url ",
            "--index-url=",
            "--extra-index-url ",
            "--extra-index-url=",
        ] {
            let (_, builder) = parse(&format!("--no-index\n{prefix}https://example.com/repo/\n"));
            let options = builder.build();
            assert_eq!(options.fetchers.len(), 1, "prefix {prefix:?}");
            assert_eq!(
                options.fetchers[0].links(&"foo".parse().unwrap())[0]
                    .url()
                    .as_str(),
                "https://example.com/repo/foo/"
            );
        }
    }

    #[test]
    fn test_no_use_wheel() {
        use crate::types::PackageKind;
        let (_, builder) = parse("--no-use-wheel\n");
        assert!(!builder.build().precedence.allows(PackageKind::Wheel));
    }

    #[test]
    fn test_editable_rejected() {
        let mut builder = ResolverOptions::builder();
        let err =
            requirements_from_lines(["-e git+https://example.com/repo"], &mut builder, Path::new("."))
                .unwrap_err();
        assert!(matches!(err, RequirementsTxtError::EditableUnsupported(_)));
    }

    #[test]
    fn test_unknown_flag_rejected() {
        let mut builder = ResolverOptions::builder();
        let err = requirements_from_lines(["--frobnicate"], &mut builder, Path::new("."))
            .unwrap_err();
        assert!(matches!(err, RequirementsTxtError::UnsupportedLine(_)));
    }

    #[test]
    fn test_nested_requirement_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("requirements1.txt"),
            "requirement1\nrequirement2\n-r requirements2.txt\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("requirements2.txt"),
            "requirement3\nrequirement4\n",
        )
        .unwrap();

        let mut builder = ResolverOptions::builder();
        let resolvables =
            requirements_from_file(&dir.path().join("requirements1.txt"), &mut builder).unwrap();
        let names: Vec<String> = resolvables
            .iter()
            .map(|r| r.name().as_str().to_owned())
            .collect();
        assert_eq!(
            names,
            vec!["requirement1", "requirement2", "requirement3", "requirement4"]
        );
    }

    #[test]
    fn test_vcs_line_is_its_own_error() {
        let mut builder = ResolverOptions::builder();
        let err = requirements_from_lines(
            ["git+https://example.com/repo"],
            &mut builder,
            Path::new("."),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RequirementsTxtError::Resolvable(ResolvableError::UnsupportedVcs(_))
        ));
    }
}
