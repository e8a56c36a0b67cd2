//! The grammar for requirement expressions (`flask[async]>=0.9,<1.0; os_name
//! == 'posix'`). Specifier lists may optionally be parenthesized, the way
//! older metadata wrote them (`foo (>=2, <3)`).

use std::str::FromStr;

use pep440_rs::{VersionSpecifier, VersionSpecifiers};

use crate::marker::MarkerExpr;
use crate::types::{Extra, PackageName, Requirement};

pub use self::parser::requirement;

peg::parser! {
    grammar parser() for str {
        rule wsp()
            = quiet!{ [' ' | '\t'] }

        rule _()
            = quiet!{ wsp()* }

        rule letter_or_digit()
            = quiet!{ ['A'..='Z' | 'a'..='z' | '0'..='9'] } / expected!("letter or digit")

        // Longest operators first so `==` does not strand the tail of `===`.
        rule version_cmp() -> &'input str
            = $("===" / "==" / "!=" / "<=" / ">=" / "~=" / "<" / ">")

        rule version()
            = (letter_or_digit() / "-" / "_" / "." / "*" / "+" / "!")+

        rule version_one()
            = _ version_cmp() _ version()

        rule version_many() -> &'input str
            = $(version_one() ++ (_ ","))

        rule versionspec() -> VersionSpecifiers
            = raw:("(" _ vm:version_many() _ ")" { vm } / version_many())
              {? VersionSpecifiers::from_str(raw.trim()).or(Err("version specifiers")) }

        rule quoted_marker() -> MarkerExpr
            = ";" _ raw:$([_]+)
              {? MarkerExpr::parse(raw).or(Err("marker expression")) }

        rule identifier() -> &'input str
            = $(letter_or_digit() (letter_or_digit() / "-" / "_" / ".")*)

        rule name() -> PackageName
            = n:identifier() {? n.parse().or(Err("project name")) }

        rule extra() -> Extra
            = e:identifier() {? e.parse().or(Err("extra name")) }

        rule extras() -> Vec<Extra>
            = "[" _ es:(extra() ** (_ "," _)) _ "]" { es }

        pub rule requirement() -> Requirement
            = _ name:name()
              _ extras:(extras() / "" { Vec::new() })
              // Direct references (`name @ url`) are links, not requirements.
              _ !"@"
              specifiers:(versionspec() / "" { std::iter::empty::<VersionSpecifier>().collect() })
              _ marker:(quoted_marker()?)
              {
                  Requirement {
                      name,
                      extras,
                      specifiers,
                      marker,
                  }
              }
    }
}
