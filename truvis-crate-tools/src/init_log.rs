use std::io::Write;

/// 默认 Info 级别，可以用 `RUST_LOG` 覆盖
pub fn init_log() {
    if let Err(e) = try_init_log(log::LevelFilter::Info) {
        eprintln!("logger already initialized: {}", e);
    }
}

/// 可以重复调用 (例如在多个测试中)，只有第一次生效
pub fn try_init_log(default_level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    env_logger::Builder::new()
        .format(|buf, record| {
            let info_style = buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
            let warn_style = buf
                .default_level_style(log::Level::Warn)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
            let error_style = buf
                .default_level_style(log::Level::Error)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

            let level_style = match record.level() {
                log::Level::Info => info_style,
                log::Level::Warn => warn_style,
                log::Level::Error => error_style,
                _ => buf.default_level_style(record.level()),
            };
            let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));
            let thread_style = info_style.fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Cyan)));
            let black_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(75, 75, 75))));

            let line = record.line().unwrap_or(!0);
            let file = short_file_name(record.file().unwrap_or(""));
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();
            let current = std::thread::current();
            let thread = current.name().unwrap_or("<unnamed>");

            writeln!(
                buf,
                "{level_style}[{time}] {level:<5}{level_style:#} {thread_style}<{thread}>{thread_style:#} \
                 {grey_style}[{file}:{line}]{grey_style:#} {black_style}{}{black_style:#}",
                record.args()
            )
        })
        .filter(None, default_level)
        .parse_default_env()
        .try_init()
}

/// 去掉路径前缀，同时兼容 `/` 和 `\`
fn short_file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
