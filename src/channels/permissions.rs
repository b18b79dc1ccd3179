//! Guild-level permission and role-hierarchy evaluation.
//!
//! Channel permission overwrites are not modeled; nickname edits and the
//! admin commands only depend on guild-wide role permissions.

use std::ops::BitOr;

/// Discord permission bitset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Permissions(u64);

impl Permissions {
    pub const NONE: Self = Self(0);
    pub const ADMINISTRATOR: Self = Self(1 << 3);
    pub const MANAGE_GUILD: Self = Self(1 << 5);
    pub const MANAGE_NICKNAMES: Self = Self(1 << 27);
    pub const ALL: Self = Self(u64::MAX);

    /// Discord serializes permission sets as decimal strings.
    pub fn parse(raw: &str) -> Self {
        Self(raw.trim().parse().unwrap_or(0))
    }

    /// True when every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when any bit of `other` is set.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Authorized to flip the rotator on and off.
    pub const fn can_toggle_bot(self) -> bool {
        self.intersects(Self(Self::ADMINISTRATOR.0 | Self::MANAGE_GUILD.0))
    }

    pub const fn can_manage_nicknames(self) -> bool {
        self.intersects(Self(Self::ADMINISTRATOR.0 | Self::MANAGE_NICKNAMES.0))
    }
}

impl BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A guild role as far as permissions and hierarchy are concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildRole {
    pub id: String,
    pub position: i64,
    pub permissions: Permissions,
}

/// Why the bot may or may not rename a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NicknameAccess {
    Allowed,
    /// The bot lacks `MANAGE_NICKNAMES`.
    MissingPermission,
    /// The bot's highest role does not sit above the member's highest role.
    Hierarchy,
    /// Owners cannot be renamed by anyone else.
    TargetIsOwner,
}

impl NicknameAccess {
    pub fn is_allowed(self) -> bool {
        self == Self::Allowed
    }
}

/// Roles and owner of one guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildSnapshot {
    pub id: String,
    pub owner_id: String,
    pub roles: Vec<GuildRole>,
}

impl GuildSnapshot {
    pub fn role(&self, role_id: &str) -> Option<&GuildRole> {
        self.roles.iter().find(|r| r.id == role_id)
    }

    pub fn role_exists(&self, role_id: &str) -> bool {
        self.role(role_id).is_some()
    }

    /// Base guild permissions of a member: `@everyone` plus each held role.
    pub fn member_permissions(&self, user_id: &str, member_roles: &[String]) -> Permissions {
        if user_id == self.owner_id {
            return Permissions::ALL;
        }

        // The @everyone role shares the guild's id.
        let mut perms = self
            .role(&self.id)
            .map_or(Permissions::NONE, |r| r.permissions);
        for role in member_roles.iter().filter_map(|id| self.role(id)) {
            perms = perms | role.permissions;
        }

        if perms.contains(Permissions::ADMINISTRATOR) {
            Permissions::ALL
        } else {
            perms
        }
    }

    /// Position of the member's highest role; `@everyone` sits at 0.
    pub fn highest_position(&self, member_roles: &[String]) -> i64 {
        member_roles
            .iter()
            .filter_map(|id| self.role(id))
            .map(|r| r.position)
            .max()
            .unwrap_or(0)
    }

    /// Whether the bot may rename `target_id`.
    pub fn nickname_access(
        &self,
        bot_id: &str,
        bot_roles: &[String],
        target_id: &str,
        target_roles: &[String],
    ) -> NicknameAccess {
        if !self.member_permissions(bot_id, bot_roles).can_manage_nicknames() {
            return NicknameAccess::MissingPermission;
        }
        if target_id == self.owner_id {
            return NicknameAccess::TargetIsOwner;
        }
        if self.highest_position(bot_roles) > self.highest_position(target_roles) {
            NicknameAccess::Allowed
        } else {
            NicknameAccess::Hierarchy
        }
    }
}
