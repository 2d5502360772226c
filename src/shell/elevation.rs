use super::quote::single_quote;

/// First API level whose `su` takes a uid argument (Marshmallow).
pub const MODERN_SU_API_LEVEL: u32 = 23;

/// How a command that must run as root gets there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elevation {
    /// Already uid 0, run as is.
    Direct,
    /// `su -c <cmd>`
    SuLegacy,
    /// `su 0 <cmd>`
    SuModern,
}

/// Root request carried by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AsRoot {
    #[default]
    No,
    /// Elevate unless the shell already runs as uid 0.
    IfNeeded,
    /// Always wrap in `su`, even when uid 0.
    Force,
}

impl Elevation {
    pub fn choose(api_level: u32, current_uid: u32, request: AsRoot) -> Elevation {
        match request {
            AsRoot::No => Elevation::Direct,
            AsRoot::IfNeeded if current_uid == 0 => Elevation::Direct,
            AsRoot::IfNeeded | AsRoot::Force => Self::su_for(api_level),
        }
    }

    fn su_for(api_level: u32) -> Elevation {
        if api_level >= MODERN_SU_API_LEVEL {
            Elevation::SuModern
        } else {
            Elevation::SuLegacy
        }
    }

    /// Wrap a shell snippet; `sh -c` keeps pipes and redirections inside su.
    pub fn wrap(self, cmd: &str) -> String {
        match self {
            Elevation::Direct => cmd.to_string(),
            Elevation::SuLegacy => format!("su -c sh -c {}", single_quote(cmd)),
            Elevation::SuModern => format!("su 0 sh -c {}", single_quote(cmd)),
        }
    }

    /// Prefix form used to probe whether su works at all.
    pub fn prefix(self, cmd: &str) -> String {
        match self {
            Elevation::Direct => cmd.to_string(),
            Elevation::SuLegacy => format!("su -c {cmd}"),
            Elevation::SuModern => format!("su 0 {cmd}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choice_by_api_level() {
        assert_eq!(Elevation::choose(23, 2000, AsRoot::IfNeeded), Elevation::SuModern);
        assert_eq!(Elevation::choose(30, 2000, AsRoot::IfNeeded), Elevation::SuModern);
        assert_eq!(Elevation::choose(22, 2000, AsRoot::IfNeeded), Elevation::SuLegacy);
        assert_eq!(Elevation::choose(30, 2000, AsRoot::No), Elevation::Direct);
    }

    #[test]
    fn test_root_uid_needs_no_su() {
        assert_eq!(Elevation::choose(30, 0, AsRoot::IfNeeded), Elevation::Direct);
        let cmd = "ls /data";
        assert_eq!(Elevation::choose(30, 0, AsRoot::IfNeeded).wrap(cmd), cmd);
        assert_eq!(Elevation::choose(19, 0, AsRoot::IfNeeded).wrap(cmd), cmd);
    }

    #[test]
    fn test_force_always_wraps() {
        assert_eq!(Elevation::choose(30, 0, AsRoot::Force), Elevation::SuModern);
        assert_eq!(Elevation::choose(21, 0, AsRoot::Force), Elevation::SuLegacy);
    }

    #[test]
    fn test_wrap_syntax() {
        assert_eq!(
            Elevation::SuModern.wrap("cat /data/x | head"),
            "su 0 sh -c 'cat /data/x | head'"
        );
        assert_eq!(
            Elevation::SuLegacy.wrap("cat /data/x"),
            "su -c sh -c 'cat /data/x'"
        );
        assert_eq!(Elevation::SuModern.prefix("ls /root"), "su 0 ls /root");
    }
}
