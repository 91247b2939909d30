use anyhow::Result;
use serenity::all::{Context, GuildId};
use serenity::async_trait;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildEntry {
    pub id: GuildId,
    pub name: String,
}

/// The guilds the bot sits in, and its own nickname in each.
#[async_trait]
pub trait GuildRoster: Send + Sync {
    async fn guilds(&self) -> Vec<GuildEntry>;

    async fn set_own_nickname(&self, guild: &GuildEntry, nickname: &str) -> Result<()>;
}

pub struct DiscordRoster {
    ctx: Context,
}

impl DiscordRoster {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl GuildRoster for DiscordRoster {
    async fn guilds(&self) -> Vec<GuildEntry> {
        self.ctx
            .cache
            .guilds()
            .into_iter()
            .map(|id| GuildEntry {
                id,
                // unavailable guilds have no cached name yet
                name: id.name(&self.ctx.cache).unwrap_or_else(|| id.to_string()),
            })
            .collect()
    }

    async fn set_own_nickname(&self, guild: &GuildEntry, nickname: &str) -> Result<()> {
        let me = self.ctx.cache.current_user().id;

        let member = guild.id.member(&self.ctx, me).await?;
        debug!(
            guild = %guild.name,
            current = ?member.nick,
            "fetched own member"
        );

        guild.id.edit_nickname(&self.ctx, Some(nickname)).await?;
        Ok(())
    }
}
