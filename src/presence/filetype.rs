use regex::{Regex, RegexBuilder};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::LazyLock;
use tracing::error;

/// Filetype reported when the detected one has no artwork.
pub const UNKNOWN: &str = "unknown";

/// Filetypes with artwork on the presence host.
const LANGUAGE_FILETYPES: &[&str] = &[
    "actionscript", "ant", "applescript", "arduino", "asciidoc", "asm", "blade", "c", "clojure",
    "cmake", "coffee", "config", "cpp", "crystal", "cs", "css", "csv", "d", "dart", "diff",
    "django", "dosbatch", "dotnet", "elixir", "elm", "erlang", "eruby", "glsl", "go", "graphql",
    "groovy", "haml", "haskell", "haxe", "hcl", "html", "ipynb", "iss", "java", "javascript",
    "jinja", "json", "jsp", "jsx", "julia", "kotlin", "less", "liquid", "lisp", "llvm", "log",
    "ls", "lua", "make", "markdown", "matlab", "mustache", "nim", "nix", "nsis", "ocaml",
    "octave", "pascal", "perl", "php", "plantuml", "postcss", "proto", "ps1", "pug", "python",
    "r", "rst", "ruby", "rust", "sass", "scala", "sh", "sql", "stylus", "svelte", "svg", "swift",
    "tcl", "tex", "textile", "toml", "twig", "typescript", "verilog", "vhdl", "vim", "vue",
    "xml", "yaml",
];

/// Pattern for `<tool>rc`, `<tool>rc.json|.js|.yml` etc, `<tool>.config.js` and `.<tool>ignore`.
fn rc_ignore(tool: &str) -> String {
    format!(r"^(\.?{tool}rc(\.js(on)?|\.ya?ml)?|{tool}\.config\.js|\.{tool}ignore)$")
}

/// Well-known file names mapped to a filetype, checked before the editor's own guess.
/// The flag marks case-insensitive patterns.
fn special_patterns() -> Vec<(&'static str, String, bool)> {
    vec![
        ("angular", r"\.?angular(-cli)?.json".into(), false),
        ("ansible", r"^(ansible\.cfg|site.ya?ml|hosts)$".into(), false),
        ("apache", r"^(.*(apache|httpd)\.conf|\.htaccess)$".into(), false),
        ("appveyor", r"^\.?appveyor\.ya?ml$".into(), false),
        ("babel", rc_ignore("babel"), false),
        ("bower", r"^(\.bowerrc|bower\.json)$".into(), false),
        ("browserslist", r"^\.?browserslist(rc|)$".into(), false),
        ("bundler", r"^(Gemfile(\.lock)|\.gemspec)$".into(), false),
        ("cargo", r"^Cargo\.(toml|lock)$".into(), false),
        ("circleci", r"^circle\.yml$".into(), false),
        ("codacy", r"\.codacy\.ya?ml$".into(), false),
        ("codeclimate", r"^\.codeclimate\.(ya?ml|json)$".into(), false),
        ("codecov", r"^\.?codecov\.ya?ml$".into(), false),
        ("composer", r"^composer\.(json|lock)$".into(), false),
        ("docker", r"^(docker-(cloud|compose.*)\.ya?ml|\.dockerignore|Dockerfile)$".into(), false),
        ("editorconfig", r"^\.editorconfig$".into(), false),
        ("eslint", rc_ignore("eslint"), false),
        ("firebase", r"^(\.?fire(base(\.json|rc)|store\.rules))$".into(), false),
        ("git", r"^(\.git(ignore|attributes|config|modules|keep)|\.mailmap)$".into(), false),
        ("gradle", r"^.+\.gradle(\.kts)?$".into(), false),
        ("grunt", r"^[Gg]runtfile\.(babel\.js|[jtl]s|coffee)$".into(), false),
        ("gulp", r"^[Gg]ulpfile\.(babel\.js|[jtl]s|coffee)$".into(), false),
        ("heroku", r"^(Procfile|app.json)$".into(), false),
        ("jenkins", r"^Jenkinsfile$".into(), false),
        ("license", r"^(LICEN[CS]E|COPYING).*$".into(), true),
        ("log", r"^.+\.log$".into(), true),
        ("manifest", r"^(manifest\.(mf|json|in)|AndroidManifest\.xml|.*\.webmanifest)$".into(), true),
        ("maven", r"^(pom\.xml|.*\.pom)$".into(), false),
        ("nginx", r"^.*nginx\.conf$".into(), false),
        ("node", r"^package\.json$".into(), false),
        ("npm", r"^(\.npm(ignore|rc)|npm-shrinkwrap\.json|package-lock\.json)$".into(), false),
        ("nuget", r"^(.*\.nuspec|nuget\.config)$".into(), true),
        ("pip", r"^(.*requirements.*\.(pip|txt)|Pipfile(\.lock)?|poetry\.lock|pyproject\.toml)$".into(), false),
        ("readme", r"^README.*$".into(), true),
        ("robots", r"^robots\.txt$".into(), false),
        ("rollup", r"^rollup.*\.config\..+$".into(), false),
        ("stylelint", rc_ignore("stylelint"), false),
        ("tern", r"^\.tern-(project|config)$".into(), false),
        ("travis", r"^\.travis\.yml$".into(), false),
        ("vagrant", r"^Vagrantfile$".into(), false),
        ("webpack", r"^webpack.*\.config\..+$".into(), false),
        ("yarn", r"^(\.yarn(ignore|rc)|yarn.lock)$".into(), false),
    ]
}

/// Special-file patterns, compiled once and anchored at the start of the file name.
static SPECIAL: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    special_patterns()
        .into_iter()
        .filter_map(|(name, pattern, case_insensitive)| {
            match RegexBuilder::new(&format!("^(?:{pattern})"))
                .case_insensitive(case_insensitive)
                .build()
            {
                Ok(regex) => Some((name, regex)),
                Err(err) => {
                    error!(filetype = name, error = %err, "special file pattern does not compile");
                    None
                }
            }
        })
        .collect()
});

static SUPPORTED: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    let mut all: Vec<&'static str> = LANGUAGE_FILETYPES.to_vec();
    all.extend(special_patterns().into_iter().map(|(name, _, _)| name));
    all.sort_unstable();
    all.dedup();
    all
});

/// Every filetype the host has artwork for, sorted.
pub fn supported_filetypes() -> &'static [&'static str] {
    &SUPPORTED
}

/// Supported filetypes containing a match for `pattern`.
pub fn matching_filetypes(pattern: &str) -> Result<Vec<&'static str>, regex::Error> {
    let regex = Regex::new(pattern)?;
    Ok(supported_filetypes()
        .iter()
        .copied()
        .filter(|ft| regex.is_match(ft))
        .collect())
}

pub fn is_supported(filetype: &str) -> bool {
    supported_filetypes().binary_search(&filetype).is_ok()
}

/// Guess a filetype from the extension, for callers without an editor filetype.
pub fn filetype_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let ft = match ext.as_str() {
        "as" => "actionscript",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => "cpp",
        "clj" | "cljs" | "edn" => "clojure",
        "coffee" => "coffee",
        "cfg" | "conf" | "ini" | "properties" => "config",
        "cr" => "crystal",
        "cs" => "cs",
        "css" => "css",
        "csv" => "csv",
        "d" => "d",
        "dart" => "dart",
        "diff" | "patch" => "diff",
        "bat" | "cmd" => "dosbatch",
        "ex" | "exs" => "elixir",
        "elm" => "elm",
        "erl" | "hrl" => "erlang",
        "erb" => "eruby",
        "glsl" | "vert" | "frag" => "glsl",
        "go" => "go",
        "graphql" | "gql" => "graphql",
        "groovy" => "groovy",
        "haml" => "haml",
        "hs" => "haskell",
        "hx" => "haxe",
        "hcl" | "tf" => "hcl",
        "html" | "htm" => "html",
        "ipynb" => "ipynb",
        "java" => "java",
        "js" | "mjs" | "cjs" => "javascript",
        "jinja" | "j2" => "jinja",
        "json" | "json5" => "json",
        "jsp" => "jsp",
        "jsx" => "jsx",
        "jl" => "julia",
        "kt" | "kts" => "kotlin",
        "less" => "less",
        "liquid" => "liquid",
        "lisp" | "el" => "lisp",
        "ll" => "llvm",
        "log" => "log",
        "lua" => "lua",
        "mk" => "make",
        "md" | "markdown" => "markdown",
        "nim" => "nim",
        "nix" => "nix",
        "nsi" => "nsis",
        "ml" | "mli" => "ocaml",
        "pas" => "pascal",
        "pl" | "pm" => "perl",
        "php" => "php",
        "puml" => "plantuml",
        "proto" => "proto",
        "ps1" => "ps1",
        "pug" => "pug",
        "py" | "pyi" => "python",
        "r" => "r",
        "rst" => "rst",
        "rb" => "ruby",
        "rs" => "rust",
        "sass" | "scss" => "sass",
        "scala" | "sc" => "scala",
        "sh" | "bash" | "zsh" | "fish" => "sh",
        "sql" => "sql",
        "styl" => "stylus",
        "svelte" => "svelte",
        "svg" => "svg",
        "swift" => "swift",
        "tcl" => "tcl",
        "tex" | "bib" => "tex",
        "toml" => "toml",
        "twig" => "twig",
        "ts" | "tsx" => "typescript",
        "v" | "sv" => "verilog",
        "vhd" | "vhdl" => "vhdl",
        "vim" => "vim",
        "vue" => "vue",
        "xml" => "xml",
        "yml" | "yaml" => "yaml",
        _ => return None,
    };
    Some(ft)
}

/// Asset key for a filetype. Single-letter filetypes get a `lang` suffix.
pub fn image_key(filetype: &str) -> String {
    if filetype.chars().count() > 1 {
        filetype.to_string()
    } else {
        format!("{filetype}lang")
    }
}

/// Maps file names to filetypes, caching results per file name.
pub struct FiletypeResolver {
    special: &'static [(&'static str, Regex)],
    aliases: BTreeMap<String, String>,
    cache: HashMap<String, Option<String>>,
}

impl FiletypeResolver {
    pub fn new(aliases: BTreeMap<String, String>) -> Self {
        Self {
            special: &SPECIAL,
            aliases,
            cache: HashMap::new(),
        }
    }

    /// Filetype for `file_name`: a special-file match first, then the
    /// editor's filetype (through the alias table), then the extension.
    pub fn resolve(&mut self, file_name: &str, editor_filetype: Option<&str>) -> Option<String> {
        if let Some(cached) = self.cache.get(file_name) {
            return cached.clone();
        }

        let detected = self
            .special
            .iter()
            .find(|(_, regex)| regex.is_match(file_name))
            .map(|(name, _)| name.to_string())
            .or_else(|| {
                editor_filetype
                    .filter(|ft| !ft.is_empty())
                    .map(|ft| self.aliases.get(ft).cloned().unwrap_or_else(|| ft.to_string()))
            })
            .or_else(|| filetype_from_extension(Path::new(file_name)).map(str::to_string));

        self.cache.insert(file_name.to_string(), detected.clone());
        detected
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    #[cfg(test)]
    fn cached(&self) -> usize {
        self.cache.len()
    }
}

impl Default for FiletypeResolver {
    fn default() -> Self {
        Self::new(BTreeMap::new())
    }
}
