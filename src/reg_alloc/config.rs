use clap::{value_parser, Arg, ArgAction, ArgMatches};

use crate::lir::{PReg, RegKind};

const DEFAULT_GENERAL_REGS: u8 = 8;
const DEFAULT_FLOAT_REGS: u8 = 4;

/// Options of the linear scan allocator.
#[derive(Debug, Clone)]
pub struct LinearScanConfig {
    /// Apply the SSA refinements: phi hints, phi resolution and the phi
    /// carve-out of spill move elimination.
    pub ssa: bool,
    /// The registers handed out by the allocator, in preference order.
    pub allocatable_regs: Vec<PReg>,
    /// The allocatable registers destroyed by call-like operations.
    pub caller_saved_regs: Vec<PReg>,
    /// Verify interval invariants after the walk.
    pub detailed_asserts: bool,
}

impl Default for LinearScanConfig {
    fn default() -> Self { Self::with_regs(DEFAULT_GENERAL_REGS, DEFAULT_FLOAT_REGS) }
}

impl LinearScanConfig {
    /// Numbered registers of each kind, the lower half of them caller-saved.
    pub fn with_regs(general: u8, float: u8) -> Self {
        let mut allocatable_regs = Vec::new();
        let mut caller_saved_regs = Vec::new();

        for (kind, count) in [(RegKind::General, general), (RegKind::Float, float)] {
            for num in 0..count {
                let reg = PReg::new(num, kind);
                allocatable_regs.push(reg);
                if num < count / 2 {
                    caller_saved_regs.push(reg);
                }
            }
        }

        Self {
            ssa: true,
            allocatable_regs,
            caller_saved_regs,
            detailed_asserts: false,
        }
    }

    pub fn is_allocatable(&self, reg: PReg) -> bool { self.allocatable_regs.contains(&reg) }

    pub fn is_caller_saved(&self, reg: PReg) -> bool { self.caller_saved_regs.contains(&reg) }

    pub fn allocatable_regs_of(&self, kind: RegKind) -> impl Iterator<Item = PReg> + '_ {
        self.allocatable_regs
            .iter()
            .copied()
            .filter(move |reg| reg.kind() == kind)
    }

    pub fn cli_args() -> Vec<Arg> {
        vec![
            Arg::new("lsra-ssa")
                .long("lsra-ssa")
                .default_value("true")
                .value_parser(value_parser!(bool)),
            Arg::new("lsra-general-regs")
                .long("lsra-general-regs")
                .default_value(DEFAULT_GENERAL_REGS.to_string())
                .value_parser(value_parser!(u8)),
            Arg::new("lsra-float-regs")
                .long("lsra-float-regs")
                .default_value(DEFAULT_FLOAT_REGS.to_string())
                .value_parser(value_parser!(u8)),
            Arg::new("lsra-detailed-asserts")
                .long("lsra-detailed-asserts")
                .action(ArgAction::SetTrue),
        ]
    }

    /// Read the options back from matches of a command built with
    /// [cli_args](Self::cli_args). Missing arguments keep their defaults.
    pub fn from_arg_matches(matches: &ArgMatches) -> Self {
        let general = matches
            .try_get_one::<u8>("lsra-general-regs")
            .ok()
            .flatten()
            .copied()
            .unwrap_or(DEFAULT_GENERAL_REGS);
        let float = matches
            .try_get_one::<u8>("lsra-float-regs")
            .ok()
            .flatten()
            .copied()
            .unwrap_or(DEFAULT_FLOAT_REGS);

        let mut config = Self::with_regs(general, float);

        if let Ok(Some(ssa)) = matches.try_get_one::<bool>("lsra-ssa") {
            config.ssa = *ssa;
        }
        if let Ok(Some(detailed_asserts)) = matches.try_get_one::<bool>("lsra-detailed-asserts") {
            config.detailed_asserts = *detailed_asserts;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use clap::Command;

    use super::LinearScanConfig;
    use crate::lir::{PReg, RegKind};

    #[test]
    fn test_default_config() {
        let config = LinearScanConfig::default();

        assert!(config.ssa);
        assert!(!config.detailed_asserts);
        assert_eq!(config.allocatable_regs_of(RegKind::General).count(), 8);
        assert_eq!(config.allocatable_regs_of(RegKind::Float).count(), 4);
        assert!(config.is_caller_saved(PReg::new(0, RegKind::General)));
        assert!(!config.is_caller_saved(PReg::new(4, RegKind::General)));
        assert!(!config.is_allocatable(PReg::new(8, RegKind::General)));
    }

    #[test]
    fn test_config_from_cli() {
        let command = Command::new("lsra").args(LinearScanConfig::cli_args());
        let matches = command
            .try_get_matches_from([
                "lsra",
                "--lsra-ssa",
                "false",
                "--lsra-general-regs",
                "3",
                "--lsra-detailed-asserts",
            ])
            .unwrap();

        let config = LinearScanConfig::from_arg_matches(&matches);

        assert!(!config.ssa);
        assert!(config.detailed_asserts);
        assert_eq!(config.allocatable_regs_of(RegKind::General).count(), 3);
        assert_eq!(config.allocatable_regs_of(RegKind::Float).count(), 4);
        assert_eq!(
            config.caller_saved_regs,
            vec![
                PReg::new(0, RegKind::General),
                PReg::new(0, RegKind::Float),
                PReg::new(1, RegKind::Float)
            ]
        );
    }
}
