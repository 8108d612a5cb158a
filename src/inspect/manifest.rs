//! Package manifest document: `<cdl><packages><package name="…"/>…`.

use serde::Serialize;

use crate::error::{Error, Result};

#[derive(Debug, Serialize)]
#[serde(rename = "cdl")]
struct Cdl<'a> {
    packages: Packages<'a>,
}

#[derive(Debug, Serialize)]
struct Packages<'a> {
    package: Vec<Package<'a>>,
}

#[derive(Debug, Serialize)]
struct Package<'a> {
    #[serde(rename = "@name")]
    name: &'a str,
}

/// One `<package>` per non-empty line, in input order.
pub fn package_manifest<S: AsRef<str>>(lines: &[S]) -> Result<String> {
    let doc = Cdl {
        packages: Packages {
            package: lines
                .iter()
                .map(AsRef::as_ref)
                .filter(|line| !line.is_empty())
                .map(|name| Package { name })
                .collect(),
        },
    };
    quick_xml::se::to_string(&doc).map_err(|e| Error::Descriptor(e.to_string()))
}
