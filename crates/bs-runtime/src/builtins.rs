//! Lua helper fragments shipped with the engine.
//!
//! The manifest is static: every execution context loads the internal
//! fragments first and then [`MANIFEST`] in order. Names exported by a
//! fragment are reserved and cannot be claimed by a capability.

/// Table under which every host export is reachable, whatever its call mode.
pub const HOST_NAMESPACE: &str = "__host";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Builtin {
    pub name: &'static str,
    pub exports: &'static [&'static str],
    pub source: &'static str,
}

pub(crate) static SUSPEND: Builtin = Builtin {
    name: "suspend",
    exports: &[],
    source: include_str!("builtins/suspend.lua"),
};

pub(crate) static GUARD: Builtin = Builtin {
    name: "guard",
    exports: &[],
    source: include_str!("builtins/guard.lua"),
};

pub const MANIFEST: &[Builtin] = &[
    Builtin {
        name: "wait_for",
        exports: &["waitFor"],
        source: include_str!("builtins/wait_for.lua"),
    },
    Builtin {
        name: "move",
        exports: &["move", "turn"],
        source: include_str!("builtins/move.lua"),
    },
];

pub fn builtin(name: &str) -> Option<&'static Builtin> {
    [&SUSPEND, &GUARD]
        .into_iter()
        .chain(MANIFEST.iter())
        .find(|builtin| builtin.name == name)
}

pub fn reserved_names() -> impl Iterator<Item = &'static str> {
    std::iter::once(HOST_NAMESPACE)
        .chain(["pcall", "xpcall"])
        .chain(MANIFEST.iter().flat_map(|builtin| builtin.exports.iter().copied()))
}

pub(crate) fn is_reserved_name(name: &str) -> bool {
    reserved_names().any(|reserved| reserved == name)
}
