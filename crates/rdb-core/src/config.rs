//! Engine configuration.
//!
//! Capacity limits that used to be fixed-size arrays are explicit, checked
//! settings here. The debuggee's argv/envp also live here: the default is to
//! launch with neither, matching the classic behaviour of the engine.

/// Default number of breakpoints a single program may hold.
pub const DEFAULT_MAX_BREAKPOINTS: usize = 16;

/// Default number of abbreviation declarations decoded per table.
pub const DEFAULT_MAX_ABBREVIATIONS: usize = 64;

/// Configuration for loading and launching a [`Program`](crate::Program)
///
/// ## Example
///
/// ```rust
/// use rdb_core::EngineConfig;
///
/// let config = EngineConfig::default()
///     .with_max_breakpoints(4)
///     .with_args(["--verbose"])
///     .with_env([("LANG", "C")]);
/// assert_eq!(config.max_breakpoints, 4);
/// assert_eq!(config.env, vec![("LANG".to_string(), "C".to_string())]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig
{
    /// Maximum simultaneous breakpoints per program
    pub max_breakpoints: usize,
    /// Maximum declarations in one abbreviation table
    pub max_abbreviations: usize,
    /// Arguments passed to the debuggee (not including `argv[0]`)
    pub args: Vec<String>,
    /// Environment of the debuggee; empty means an empty environment
    pub env: Vec<(String, String)>,
    /// Whether to pass the executable path as `argv[0]`
    ///
    /// Off by default: the debuggee is started with an empty argv.
    pub pass_argv0: bool,
}

impl Default for EngineConfig
{
    fn default() -> Self
    {
        Self {
            max_breakpoints: DEFAULT_MAX_BREAKPOINTS,
            max_abbreviations: DEFAULT_MAX_ABBREVIATIONS,
            args: Vec::new(),
            env: Vec::new(),
            pass_argv0: false,
        }
    }
}

impl EngineConfig
{
    /// Set the breakpoint capacity.
    #[must_use]
    pub fn with_max_breakpoints(mut self, max: usize) -> Self
    {
        self.max_breakpoints = max;
        self
    }

    /// Set the abbreviation table capacity.
    #[must_use]
    pub fn with_max_abbreviations(mut self, max: usize) -> Self
    {
        self.max_abbreviations = max;
        self
    }

    /// Forward arguments to the debuggee. Implies `pass_argv0`.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self.pass_argv0 = true;
        self
    }

    /// Forward environment variables to the debuggee.
    #[must_use]
    pub fn with_env<I, K, V>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = env.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }
}
