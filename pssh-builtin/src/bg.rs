use super::ShellProxy;
use pssh_types::{Context, ExitStatus};

pub fn command(ctx: &Context, argv: Vec<String>, proxy: &mut dyn ShellProxy) -> ExitStatus {
    if argv.len() < 2 {
        ctx.write_stdout("\nUsage: bg %<job number>\n").ok();
        return ExitStatus::ExitedWith(1);
    }
    match proxy.dispatch(ctx, "bg", argv) {
        Ok(_) => ExitStatus::ExitedWith(0),
        Err(e) => {
            ctx.write_stderr(&format!("pssh: {e}")).ok();
            ExitStatus::ExitedWith(1)
        }
    }
}
