use std::time::Instant;

use anyhow::{bail, Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use query_state_engine::collaborators::{ExecutionFailure, QueryExecutor, QueryOutput};
use query_state_engine::{
    EditOrigin, EngineConfig, ExecutionOutcome, ModeSwitchOutcome, QueryMode, QueryState,
    QueryStateEngine, TimeRange,
};

/// 默认查询最近15分钟
const DEFAULT_WINDOW_MS: i64 = 15 * 60 * 1000;
const LOCAL_TEAM: &str = "local";

const HELP: &str = r#"命令:
  :mode filter|sql       切换编辑模式
  :limit N               设置行数限制
  :range START END       设置时间范围 (Unix毫秒)
  :source NAME           切换数据源
  :sql                   显示将要执行的SQL
  :status                显示脏状态诊断
  :run                   试运行当前查询并记录快照
  :help                  显示帮助
  :quit                  退出
其他输入作为当前模式的查询文本"#;

/// 试运行执行器：只打印SQL，不连接后端
struct DryRunExecutor;

impl QueryExecutor for DryRunExecutor {
    fn execute(&self, sql: &str) -> Result<QueryOutput, ExecutionFailure> {
        println!("[试运行] 将执行:\n{}", sql);
        Ok(QueryOutput::default())
    }
}

/// 加载配置，未指定路径时使用默认配置
fn load_config() -> Result<EngineConfig> {
    match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_json_file(&path)
            .with_context(|| format!("加载配置失败: {}", path)),
        None => {
            println!("⚠️ 未指定配置文件，使用默认配置（无数据源）");
            Ok(EngineConfig::default())
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("query_state_engine=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config()?;
    let mut engine = QueryStateEngine::from_config(&config);

    let now = chrono::Utc::now().timestamp_millis();
    let mut state = QueryState::new(TimeRange::new(now - DEFAULT_WINDOW_MS, now), config.default_limit);

    println!("--- Query Shell ---");
    match engine.sources().selected_name() {
        Some(name) => println!("✅ 当前数据源: {}", name),
        None => println!("⚠️ 未选择数据源，可用: {}", engine.sources().names().collect::<Vec<_>>().join(", ")),
    }
    println!("输入 :help 查看命令");

    let mut editor = DefaultEditor::new()?;
    loop {
        let prompt = format!("{}> ", state.mode);
        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        if let Some(recomputed) = engine.poll_recompute(&mut state, Instant::now()) {
            if recomputed.sql_updated {
                println!("SQL已按新的时间范围/行数更新");
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(e) = editor.add_history_entry(line) {
            warn!(error = %e, "failed to record history entry");
        }

        match handle_line(&mut engine, &mut state, line) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("✗ {:#}", e),
        }
    }

    Ok(())
}

/// 处理一行输入，返回 `false` 表示退出
fn handle_line(engine: &mut QueryStateEngine, state: &mut QueryState, line: &str) -> Result<bool> {
    let Some(command) = line.strip_prefix(':') else {
        engine.edit_text(state, line);
        return Ok(true);
    };

    let mut parts = command.split_whitespace();
    match (parts.next().unwrap_or_default(), parts.collect::<Vec<_>>().as_slice()) {
        ("quit" | "q", _) => return Ok(false),
        ("help", _) => println!("{}", HELP),
        ("mode", [mode]) => {
            let target: QueryMode = mode.parse().map_err(anyhow::Error::msg)?;
            match engine.switch_mode(state, target, EditOrigin::User) {
                ModeSwitchOutcome::Unchanged => println!("已经是 {} 模式", target),
                ModeSwitchOutcome::Switched { sql } => {
                    println!("✓ 切换到 {} 模式 ({:?})", target, sql);
                    if target == QueryMode::Sql {
                        println!("{}", state.sql_text);
                    }
                }
                ModeSwitchOutcome::Rejected(e) => println!("✗ 过滤语法无效: {}", e),
            }
        }
        ("limit", [value]) => {
            let limit: u64 = value.parse().with_context(|| format!("无效的行数: {}", value))?;
            if limit == 0 {
                bail!("行数限制必须大于0");
            }
            state.row_limit = limit;
            engine.schedule_recompute(Instant::now());
        }
        ("range", [start, end]) => {
            let start: i64 = start.parse().with_context(|| format!("无效的开始时间: {}", start))?;
            let end: i64 = end.parse().with_context(|| format!("无效的结束时间: {}", end))?;
            if start > end {
                bail!("开始时间晚于结束时间");
            }
            state.time_range = TimeRange::new(start, end);
            engine.schedule_recompute(Instant::now());
        }
        ("source", [name]) => {
            let source = engine.sources_mut().select(name)?;
            println!("✓ 数据源: {}", source.qualified_table());
        }
        ("sql", _) => println!("{}", engine.sql_for_execution(state)?),
        ("status", _) => {
            let dirty = engine.dirty_state(state);
            println!("{}", serde_json::to_string_pretty(&dirty)?);
        }
        ("run", _) => match engine.execute(state, Some(LOCAL_TEAM), &DryRunExecutor)? {
            ExecutionOutcome::Completed(output) => println!("✓ 完成，返回 {} 行", output.rows.len()),
            ExecutionOutcome::Superseded => println!("⚠️ 结果已被更新的查询取代"),
        },
        (other, _) => println!("未知命令或参数错误: :{}，输入 :help 查看命令", other),
    }

    Ok(true)
}
