//! 控制台输入输出
//!
//! 多个线程（交互循环、通知循环）共用一个控制台，输出按行串行化。

use std::io::{self, BufRead, Write};
use std::sync::{Mutex, PoisonError};

/// 用户界面
pub trait Console: Send + Sync {
    /// 显示一段文本
    fn display(&self, text: &str);

    /// 读取一行输入（已去除首尾空白，可能为空）；输入已关闭时返回 `None`
    fn read_line(&self, prompt: &str) -> Option<String>;
}

/// 标准输入输出控制台
#[derive(Default)]
pub struct StdConsole {
    output: Mutex<()>,
}

impl StdConsole {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Console for StdConsole {
    fn display(&self, text: &str) {
        let _guard = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{}", text);
        let _ = stdout.flush();
    }

    fn read_line(&self, prompt: &str) -> Option<String> {
        {
            let _guard = self.output.lock().unwrap_or_else(PoisonError::into_inner);
            let mut stdout = io::stdout().lock();
            let _ = write!(stdout, "{}", prompt);
            let _ = stdout.flush();
        }

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// 脚本化控制台：按顺序返回预设输入，记录所有输出
    #[derive(Default)]
    pub(crate) struct ScriptedConsole {
        inputs: Mutex<VecDeque<String>>,
        outputs: Mutex<Vec<String>>,
    }

    impl ScriptedConsole {
        pub fn with_inputs(inputs: &[&str]) -> Self {
            Self {
                inputs: Mutex::new(inputs.iter().map(|s| s.to_string()).collect()),
                outputs: Mutex::new(Vec::new()),
            }
        }

        pub fn outputs(&self) -> Vec<String> {
            self.outputs.lock().unwrap().clone()
        }

        pub fn remaining(&self) -> usize {
            self.inputs.lock().unwrap().len()
        }

        pub fn saw(&self, needle: &str) -> bool {
            self.outputs().iter().any(|line| line.contains(needle))
        }
    }

    impl Console for ScriptedConsole {
        fn display(&self, text: &str) {
            self.outputs.lock().unwrap().push(text.to_string());
        }

        fn read_line(&self, _prompt: &str) -> Option<String> {
            self.inputs.lock().unwrap().pop_front()
        }
    }
}
