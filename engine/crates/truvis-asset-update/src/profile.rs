/// 打开一个 tracy zone
///
/// 与 `tracy_client::span!` 不同，没有运行中的 tracy client 时什么也不做，
/// 因此单元测试和不开 profiler 的进程里也可以直接使用。
#[macro_export]
macro_rules! profile_span {
    ($name:literal) => {
        $crate::tracy_client::Client::running()
            .map(|client| client.span($crate::tracy_client::span_location!($name), 0))
    };
}
