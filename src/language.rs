use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::error::RunError;

/// Placeholder replaced by the staging directory as seen inside the sandbox
pub const DIR_PLACEHOLDER: &str = "%DIR%";

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cpp,
    Python,
    Ruby,
    Java,
    Javascript,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::C,
        Language::Cpp,
        Language::Python,
        Language::Ruby,
        Language::Java,
        Language::Javascript,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Python => "python",
            Self::Ruby => "ruby",
            Self::Java => "java",
            Self::Javascript => "javascript",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = RunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| RunError::UnsupportedLanguage(s.to_string()))
    }
}

/// An auxiliary file copied next to the submission before every run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub host_path: PathBuf,
    pub file_name: String,
}

/// One program invocation inside the sandbox, argv-style
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub argv: Vec<String>,
}

impl Invocation {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    /// Substitutes placeholders in every argument. Arguments are never
    /// re-split, so file names cannot inject extra arguments.
    pub fn render(&self, dir: &Path) -> Vec<String> {
        let dir = dir.to_string_lossy();
        let mut mapping = HashMap::<&str, &str>::new();
        mapping.insert(DIR_PLACEHOLDER, &dir);
        apply_template(&self.argv, &mapping)
    }
}

/// Recipe for building and running one language inside the sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageProfile {
    pub language: Language,
    pub code_file: String,
    pub unit_test_file: String,
    pub assets: Vec<Asset>,
    /// Run in order; a failing step stops the chain
    pub steps: Vec<Invocation>,
    /// The toolchain misbehaves after repeated runs, so recycle the sandbox
    /// after every execution
    pub recycle_after_run: bool,
}

impl LanguageProfile {
    /// Concrete argv list for every step, rooted at `dir`
    pub fn plan(&self, dir: &Path) -> Vec<Vec<String>> {
        self.steps.iter().map(|s| s.render(dir)).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    profiles: HashMap<Language, LanguageProfile>,
}

impl LanguageRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the six supported languages.
    ///
    /// `wrapper` prefixes every invocation (the in-sandbox launcher that
    /// applies rlimits and drops privileges); `assets_dir` is where the
    /// host keeps third-party headers and jars.
    pub fn builtin(wrapper: &[String], assets_dir: &Path) -> Self {
        let step = |args: &[&str]| {
            Invocation::new(
                wrapper
                    .iter()
                    .cloned()
                    .chain(args.iter().map(|a| a.to_string())),
            )
        };
        let asset = |file_name: &str| Asset {
            host_path: assets_dir.join(file_name),
            file_name: file_name.to_string(),
        };
        let java_cp = "%DIR%/junit.jar:%DIR%/hamcrest-core.jar";
        let java_run_cp = "%DIR%:%DIR%/junit.jar:%DIR%/hamcrest-core.jar";

        let mut registry = Self::empty();
        registry.insert(LanguageProfile {
            language: Language::C,
            code_file: "program.c".to_string(),
            unit_test_file: "program_test.c".to_string(),
            assets: vec![],
            steps: vec![
                step(&[
                    "/usr/bin/gcc",
                    "-std=c11",
                    "-O2",
                    "-o",
                    "%DIR%/program_test",
                    "%DIR%/program.c",
                    "%DIR%/program_test.c",
                    "-lm",
                ]),
                step(&["%DIR%/program_test"]),
            ],
            recycle_after_run: false,
        });
        registry.insert(LanguageProfile {
            language: Language::Cpp,
            code_file: "solution.cpp".to_string(),
            unit_test_file: "solution_test.cpp".to_string(),
            assets: vec![asset("catch.hpp")],
            steps: vec![
                step(&[
                    "/usr/bin/g++",
                    "-std=c++11",
                    "-O2",
                    "-I",
                    "%DIR%",
                    "-o",
                    "%DIR%/solution_test",
                    "%DIR%/solution.cpp",
                    "%DIR%/solution_test.cpp",
                ]),
                step(&["%DIR%/solution_test"]),
            ],
            recycle_after_run: false,
        });
        registry.insert(LanguageProfile {
            language: Language::Python,
            code_file: "foo.py".to_string(),
            unit_test_file: "foo_test.py".to_string(),
            assets: vec![],
            steps: vec![step(&["/usr/bin/python3", "%DIR%/foo_test.py"])],
            recycle_after_run: false,
        });
        registry.insert(LanguageProfile {
            language: Language::Ruby,
            code_file: "foo.rb".to_string(),
            unit_test_file: "foo_test.rb".to_string(),
            assets: vec![],
            steps: vec![step(&["/usr/bin/ruby", "-I", "%DIR%", "%DIR%/foo_test.rb"])],
            recycle_after_run: false,
        });
        registry.insert(LanguageProfile {
            language: Language::Java,
            code_file: "Solution.java".to_string(),
            unit_test_file: "SolutionTest.java".to_string(),
            assets: vec![asset("junit.jar"), asset("hamcrest-core.jar")],
            steps: vec![
                step(&[
                    "/usr/bin/javac",
                    "-J-Xmx350m",
                    "-cp",
                    java_cp,
                    "-d",
                    "%DIR%",
                    "%DIR%/Solution.java",
                    "%DIR%/SolutionTest.java",
                ]),
                step(&[
                    "/usr/bin/java",
                    "-Xmx350m",
                    "-cp",
                    java_run_cp,
                    "org.junit.runner.JUnitCore",
                    "SolutionTest",
                ]),
            ],
            recycle_after_run: true,
        });
        registry.insert(LanguageProfile {
            language: Language::Javascript,
            code_file: "foo.js".to_string(),
            unit_test_file: "foo_test.js".to_string(),
            assets: vec![],
            steps: vec![step(&["/usr/bin/node", "%DIR%/foo_test.js"])],
            recycle_after_run: false,
        });
        registry
    }

    /// Adds or replaces the profile for its language
    pub fn insert(&mut self, profile: LanguageProfile) -> Option<LanguageProfile> {
        self.profiles.insert(profile.language, profile)
    }

    pub fn get(&self, language: Language) -> Result<&LanguageProfile, RunError> {
        self.profiles
            .get(&language)
            .ok_or_else(|| RunError::UnsupportedLanguage(language.to_string()))
    }

    /// Looks up a profile by its URL name
    pub fn resolve(&self, name: &str) -> Result<&LanguageProfile, RunError> {
        self.get(name.parse()?)
    }

    pub fn languages(&self) -> impl Iterator<Item = Language> + '_ {
        self.profiles.keys().copied()
    }
}

/// Applies template substitutions to every command argument
fn apply_template(cmd_template: &[String], mapping: &HashMap<&str, &str>) -> Vec<String> {
    cmd_template
        .iter()
        .map(|s| {
            let mut t = s.clone();
            for (k, v) in mapping.iter() {
                t = t.replace(k, v);
            }
            t
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn registry() -> LanguageRegistry {
        LanguageRegistry::builtin(
            &["/usr/local/bin/sandbox".to_string()],
            Path::new("/opt/assets"),
        )
    }

    #[test]
    fn test_dispatch_table() {
        let registry = registry();
        let dir = Path::new("/tmp/stage");
        let w = "/usr/local/bin/sandbox";

        let cases: Vec<(&str, &str, &str, Vec<&str>, Vec<Vec<&str>>, bool)> = vec![
            (
                "c",
                "program.c",
                "program_test.c",
                vec![],
                vec![
                    vec![
                        w,
                        "/usr/bin/gcc",
                        "-std=c11",
                        "-O2",
                        "-o",
                        "/tmp/stage/program_test",
                        "/tmp/stage/program.c",
                        "/tmp/stage/program_test.c",
                        "-lm",
                    ],
                    vec![w, "/tmp/stage/program_test"],
                ],
                false,
            ),
            (
                "cpp",
                "solution.cpp",
                "solution_test.cpp",
                vec!["catch.hpp"],
                vec![
                    vec![
                        w,
                        "/usr/bin/g++",
                        "-std=c++11",
                        "-O2",
                        "-I",
                        "/tmp/stage",
                        "-o",
                        "/tmp/stage/solution_test",
                        "/tmp/stage/solution.cpp",
                        "/tmp/stage/solution_test.cpp",
                    ],
                    vec![w, "/tmp/stage/solution_test"],
                ],
                false,
            ),
            (
                "python",
                "foo.py",
                "foo_test.py",
                vec![],
                vec![vec![w, "/usr/bin/python3", "/tmp/stage/foo_test.py"]],
                false,
            ),
            (
                "ruby",
                "foo.rb",
                "foo_test.rb",
                vec![],
                vec![vec![w, "/usr/bin/ruby", "-I", "/tmp/stage", "/tmp/stage/foo_test.rb"]],
                false,
            ),
            (
                "java",
                "Solution.java",
                "SolutionTest.java",
                vec!["junit.jar", "hamcrest-core.jar"],
                vec![
                    vec![
                        w,
                        "/usr/bin/javac",
                        "-J-Xmx350m",
                        "-cp",
                        "/tmp/stage/junit.jar:/tmp/stage/hamcrest-core.jar",
                        "-d",
                        "/tmp/stage",
                        "/tmp/stage/Solution.java",
                        "/tmp/stage/SolutionTest.java",
                    ],
                    vec![
                        w,
                        "/usr/bin/java",
                        "-Xmx350m",
                        "-cp",
                        "/tmp/stage:/tmp/stage/junit.jar:/tmp/stage/hamcrest-core.jar",
                        "org.junit.runner.JUnitCore",
                        "SolutionTest",
                    ],
                ],
                true,
            ),
            (
                "javascript",
                "foo.js",
                "foo_test.js",
                vec![],
                vec![vec![w, "/usr/bin/node", "/tmp/stage/foo_test.js"]],
                false,
            ),
        ];

        assert_eq!(cases.len(), Language::ALL.len());

        for (name, code, test, assets, plan, recycle) in cases {
            let profile = registry.resolve(name).unwrap();
            assert_eq!(profile.language.as_str(), name);
            assert_eq!(profile.code_file, code, "{name}");
            assert_eq!(profile.unit_test_file, test, "{name}");
            let asset_names: Vec<&str> =
                profile.assets.iter().map(|a| a.file_name.as_str()).collect();
            assert_eq!(asset_names, assets, "{name}");
            for a in &profile.assets {
                assert_eq!(a.host_path, Path::new("/opt/assets").join(&a.file_name));
            }
            let expected: Vec<Vec<String>> = plan
                .into_iter()
                .map(|s| s.into_iter().map(String::from).collect())
                .collect();
            assert_eq!(profile.plan(dir), expected, "{name}");
            assert_eq!(profile.recycle_after_run, recycle, "{name}");
        }
    }

    #[test]
    fn test_plan_is_deterministic() {
        let registry = registry();
        let dir = Path::new("/tmp/stage");
        for language in Language::ALL {
            let profile = registry.get(language).unwrap();
            assert_eq!(profile.plan(dir), profile.plan(dir));
        }
    }

    #[test]
    fn test_unsupported_language() {
        let registry = registry();
        for name in ["go", "", "Python", "c++"] {
            match registry.resolve(name) {
                Err(RunError::UnsupportedLanguage(n)) => assert_eq!(n, name),
                other => panic!("expected unsupported language for {name:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_missing_profile_is_unsupported() {
        let registry = LanguageRegistry::empty();
        assert!(matches!(
            registry.get(Language::Ruby),
            Err(RunError::UnsupportedLanguage(n)) if n == "ruby"
        ));
    }

    #[test]
    fn test_placeholder_does_not_split_arguments() {
        let step = Invocation::new(["cat", "%DIR%/foo.py"]);
        let argv = step.render(Path::new("/tmp/a dir; rm -rf /"));
        assert_eq!(argv, vec!["cat", "/tmp/a dir; rm -rf //foo.py"]);
    }

    #[test]
    fn test_insert_replaces_profile() {
        let mut registry = registry();
        let custom = LanguageProfile {
            language: Language::Python,
            code_file: "main.py".to_string(),
            unit_test_file: "main_test.py".to_string(),
            assets: vec![],
            steps: vec![Invocation::new(["/bin/sh", "-c", "true"])],
            recycle_after_run: false,
        };
        let old = registry.insert(custom.clone()).unwrap();
        assert_eq!(old.code_file, "foo.py");
        assert_eq!(registry.get(Language::Python).unwrap(), &custom);
        assert_eq!(registry.languages().count(), 6);
    }

    #[test]
    fn test_language_serde_names() {
        for language in Language::ALL {
            let json = serde_json::to_string(&language).unwrap();
            assert_eq!(json, format!("\"{}\"", language.as_str()));
        }
    }
}
