//! Scalar SQL functions.

use std::path::Path;

use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::Connection;

/// Names `detect_language` is registered under. `enry_detect_language`
/// keeps queries written for enry-based tools working.
const DETECT_LANGUAGE_NAMES: [&str; 2] = ["detect_language", "enry_detect_language"];

pub(crate) fn register(conn: &Connection) -> rusqlite::Result<()> {
    for name in DETECT_LANGUAGE_NAMES {
        conn.create_scalar_function(
            name,
            2,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let path = match ctx.get_raw(0) {
                    ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes),
                    _ => return Ok(None),
                };
                let contents = match ctx.get_raw(1) {
                    ValueRef::Text(bytes) | ValueRef::Blob(bytes) => bytes,
                    _ => &[][..],
                };
                Ok(detect_language(&path, contents))
            },
        )?;
    }
    Ok(())
}

const FILENAMES: &[(&str, &str)] = &[
    ("Makefile", "Makefile"),
    ("GNUmakefile", "Makefile"),
    ("Dockerfile", "Dockerfile"),
    ("Containerfile", "Dockerfile"),
    ("CMakeLists.txt", "CMake"),
    ("Rakefile", "Ruby"),
    ("Gemfile", "Ruby"),
    ("Jenkinsfile", "Groovy"),
    ("BUILD.bazel", "Starlark"),
    ("go.mod", "Go Module"),
    ("Cargo.lock", "TOML"),
];

const EXTENSIONS: &[(&str, &str)] = &[
    ("rs", "Rust"),
    ("go", "Go"),
    ("c", "C"),
    ("h", "C"),
    ("cc", "C++"),
    ("cpp", "C++"),
    ("cxx", "C++"),
    ("hpp", "C++"),
    ("cs", "C#"),
    ("java", "Java"),
    ("kt", "Kotlin"),
    ("kts", "Kotlin"),
    ("scala", "Scala"),
    ("swift", "Swift"),
    ("m", "Objective-C"),
    ("py", "Python"),
    ("pyi", "Python"),
    ("rb", "Ruby"),
    ("php", "PHP"),
    ("pl", "Perl"),
    ("pm", "Perl"),
    ("lua", "Lua"),
    ("js", "JavaScript"),
    ("mjs", "JavaScript"),
    ("cjs", "JavaScript"),
    ("jsx", "JavaScript"),
    ("ts", "TypeScript"),
    ("tsx", "TSX"),
    ("vue", "Vue"),
    ("svelte", "Svelte"),
    ("html", "HTML"),
    ("htm", "HTML"),
    ("css", "CSS"),
    ("scss", "SCSS"),
    ("sass", "Sass"),
    ("less", "Less"),
    ("sh", "Shell"),
    ("bash", "Shell"),
    ("zsh", "Shell"),
    ("fish", "fish"),
    ("ps1", "PowerShell"),
    ("sql", "SQL"),
    ("md", "Markdown"),
    ("markdown", "Markdown"),
    ("rst", "reStructuredText"),
    ("json", "JSON"),
    ("yaml", "YAML"),
    ("yml", "YAML"),
    ("toml", "TOML"),
    ("xml", "XML"),
    ("proto", "Protocol Buffer"),
    ("graphql", "GraphQL"),
    ("tf", "HCL"),
    ("hcl", "HCL"),
    ("ex", "Elixir"),
    ("exs", "Elixir"),
    ("erl", "Erlang"),
    ("hs", "Haskell"),
    ("ml", "OCaml"),
    ("clj", "Clojure"),
    ("dart", "Dart"),
    ("r", "R"),
    ("jl", "Julia"),
    ("zig", "Zig"),
    ("nix", "Nix"),
];

const INTERPRETERS: &[(&str, &str)] = &[
    ("sh", "Shell"),
    ("bash", "Shell"),
    ("zsh", "Shell"),
    ("dash", "Shell"),
    ("ksh", "Shell"),
    ("fish", "fish"),
    ("python", "Python"),
    ("ruby", "Ruby"),
    ("perl", "Perl"),
    ("node", "JavaScript"),
    ("deno", "TypeScript"),
    ("php", "PHP"),
    ("lua", "Lua"),
];

/// Detects a file's language from its name, then from a shebang line.
/// Returns `None` when neither is recognized.
pub fn detect_language(path: &str, contents: &[u8]) -> Option<&'static str> {
    let path = Path::new(path);
    let file_name = path.file_name().and_then(|n| n.to_str());

    if let Some(name) = file_name {
        if let Some((_, lang)) = FILENAMES.iter().find(|(n, _)| *n == name) {
            return Some(lang);
        }
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    if let Some(ext) = extension {
        if let Some((_, lang)) = EXTENSIONS.iter().find(|(e, _)| *e == ext) {
            return Some(lang);
        }
    }

    shebang_language(contents)
}

fn shebang_language(contents: &[u8]) -> Option<&'static str> {
    let first_line = contents.split(|&b| b == b'\n').next()?;
    let line = std::str::from_utf8(first_line).ok()?.strip_prefix("#!")?;

    let mut words = line.split_whitespace();
    let mut program = words.next()?.rsplit('/').next()?;
    if program == "env" {
        // `#!/usr/bin/env -S python3 -u`
        program = words.find(|w| !w.starts_with('-'))?;
    }
    // python3.11 -> python
    let program = program.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.');

    INTERPRETERS
        .iter()
        .find(|(name, _)| *name == program)
        .map(|(_, lang)| *lang)
}
