// Panic isolation for handler execution
use crate::port::handler::ExecutionError;
use std::future::Future;
use tokio::task::JoinError;
use tracing::error;

/// Run `future` on its own task so a panic inside it cannot take the worker down
///
/// A panic (or cancellation) comes back as `ExecutionError::Panicked`, which
/// the broker records like any other failed attempt.
pub async fn execute_guarded<F, T>(future: F) -> Result<T, ExecutionError>
where
    F: Future<Output = Result<T, ExecutionError>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn(future).await {
        Ok(result) => result,
        Err(join_err) => {
            let panic_msg = panic_message(join_err);
            error!(panic_msg = %panic_msg, "Handler task panicked");
            Err(ExecutionError::Panicked(panic_msg))
        }
    }
}

fn panic_message(join_err: JoinError) -> String {
    if join_err.is_cancelled() {
        return "task cancelled".to_string();
    }
    let panic_info = join_err.into_panic();
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success_passes_through() {
        let result = execute_guarded(async { Ok::<_, ExecutionError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_error_passes_through() {
        let result =
            execute_guarded(async { Err::<(), _>(ExecutionError::failed("boom")) }).await;
        assert!(matches!(result, Err(ExecutionError::Failed(msg)) if msg == "boom"));
    }

    #[tokio::test]
    async fn test_panic_becomes_execution_error() {
        let result = execute_guarded(async {
            if true {
                panic!("handler exploded");
            }
            Ok::<(), ExecutionError>(())
        })
        .await;

        match result {
            Err(ExecutionError::Panicked(msg)) => assert_eq!(msg, "handler exploded"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_formatted_panic_message() {
        let code = 7;
        let result = execute_guarded(async move {
            if code > 0 {
                panic!("exit code {}", code);
            }
            Ok::<(), ExecutionError>(())
        })
        .await;

        assert!(matches!(result, Err(ExecutionError::Panicked(msg)) if msg == "exit code 7"));
    }
}
