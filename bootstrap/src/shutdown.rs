//! Graceful Shutdown

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shutdown 控制器
///
/// 所有后台任务持有同一个 token 的子 token，触发后依次退出
#[derive(Clone, Default)]
pub struct ShutdownController {
    token: CancellationToken,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::default()
    }

    /// 交给后台任务的 token
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// 触发关闭
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("Triggering shutdown");
        }
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 等待关闭信号
    pub fn wait(&self) -> impl Future<Output = ()> + Send + '_ {
        self.token.cancelled()
    }
}

/// 运行任务直到完成或收到关闭信号
pub async fn run_with_shutdown<F, Fut, T>(shutdown: &ShutdownController, task: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    tokio::select! {
        result = task() => Some(result),
        _ = shutdown.wait() => {
            info!("Task cancelled due to shutdown");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_child_tokens_cancelled_on_shutdown() {
        let controller = ShutdownController::new();
        let token = controller.token();
        assert!(!token.is_cancelled());

        controller.shutdown();
        controller.shutdown();
        assert!(token.is_cancelled());
        assert!(controller.is_shutdown());
    }

    #[tokio::test]
    async fn test_run_with_shutdown() {
        let controller = ShutdownController::new();
        assert_eq!(run_with_shutdown(&controller, || async { 5 }).await, Some(5));

        let trigger = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.shutdown();
        });
        let result = run_with_shutdown(&controller, || std::future::pending::<u32>()).await;
        assert_eq!(result, None);
    }
}
