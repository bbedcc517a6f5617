//! Inline vs fork classification

/// Launcher flags parsed from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchFlags {
    pub cache_enabled: bool,
    pub help_requested: bool,
    pub watch_requested: bool,
}

impl Default for LaunchFlags {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            help_requested: false,
            watch_requested: false,
        }
    }
}

/// What to launch. `command` and `args` describe the forked child;
/// the inline path ignores them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub command: String,
    pub args: Vec<String>,
    pub flags: LaunchFlags,
}

impl LaunchRequest {
    pub fn new<I, S>(command: impl Into<String>, args: I, flags: LaunchFlags) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            flags,
        }
    }

    pub fn mode(&self) -> LaunchMode {
        classify(&self.flags)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Run the build in this process
    Inline,
    /// Run the build in a detached child
    Fork,
}

/// Help, watch mode and a disabled cache run inline; everything else forks.
pub fn classify(flags: &LaunchFlags) -> LaunchMode {
    if !flags.cache_enabled || flags.help_requested || flags.watch_requested {
        LaunchMode::Inline
    } else {
        LaunchMode::Fork
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truth_table() {
        for cache_enabled in [false, true] {
            for help_requested in [false, true] {
                for watch_requested in [false, true] {
                    let flags = LaunchFlags {
                        cache_enabled,
                        help_requested,
                        watch_requested,
                    };
                    let expected = if cache_enabled && !help_requested && !watch_requested {
                        LaunchMode::Fork
                    } else {
                        LaunchMode::Inline
                    };
                    assert_eq!(classify(&flags), expected, "{:?}", flags);
                }
            }
        }
    }

    #[test]
    fn default_flags_fork() {
        let request = LaunchRequest::new("node", ["build.js"], LaunchFlags::default());
        assert_eq!(request.mode(), LaunchMode::Fork);
        assert_eq!(request.args, vec!["build.js"]);
    }
}
