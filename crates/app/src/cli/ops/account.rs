use clap::{Args, Subcommand};

use common::quota::Usage;

use crate::cli::op::{CommandError, Op, OpContext};
use crate::cli::ops::format_size;

#[derive(Args, Debug, Clone)]
pub struct Open {
    /// Quota in bytes (default: configured default quota)
    #[arg(long)]
    pub quota: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct UsageCmd;

#[derive(Args, Debug, Clone)]
pub struct SetQuota {
    /// New quota in bytes
    pub bytes: u64,
}

#[derive(Args, Debug, Clone)]
pub struct Recompute;

fn describe(usage: &Usage) -> String {
    format!(
        "{} of {} used ({:.1}%), {} free",
        format_size(usage.total_used),
        format_size(usage.total_quota),
        usage.percentage(),
        format_size(usage.remaining()),
    )
}

#[async_trait::async_trait]
impl Op for Open {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let usage = ctx
            .with_vault(|vault| async move {
                vault.quota().open_account(ctx.owner, self.quota).await
            })
            .await?;
        ctx.render(&usage, describe)
    }
}

#[async_trait::async_trait]
impl Op for UsageCmd {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let usage = ctx
            .with_vault(|vault| async move {
                vault.quota().usage(ctx.owner).await
            })
            .await?;
        ctx.render(&usage, describe)
    }
}

#[async_trait::async_trait]
impl Op for SetQuota {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let usage = ctx
            .with_vault(|vault| async move {
                vault.quota().set_quota(ctx.owner, self.bytes).await
            })
            .await?;
        ctx.render(&usage, describe)
    }
}

#[async_trait::async_trait]
impl Op for Recompute {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let (before, used) = ctx
            .with_vault(|vault| async move {
                let before = vault.quota().usage(ctx.owner).await?;
                let used = vault.quota().recompute(ctx.owner).await?;
                Ok::<_, CommandError>((before, used))
            })
            .await?;
        if used != before.total_used {
            tracing::warn!(
                owner = %ctx.owner,
                recorded = before.total_used,
                actual = used,
                "usage drift corrected"
            );
        }
        ctx.render(&used, |used| format!("usage recomputed: {}", format_size(*used)))
    }
}

crate::command_enum! {
    (Open, Open),
    (Usage, UsageCmd),
    (SetQuota, SetQuota),
    (Recompute, Recompute),
}

pub type AccountCommand = Command;

#[derive(Args, Debug, Clone)]
pub struct Account {
    #[command(subcommand)]
    pub command: AccountCommand,
}

#[async_trait::async_trait]
impl Op for Account {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}
