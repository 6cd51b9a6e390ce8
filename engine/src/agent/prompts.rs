//! Prompt text sent to the model

use sdk::ExecutionResult;

pub const SYSTEM_PROMPT: &str = "\
You are an advanced AI assistant with the following capabilities:

1. Code Help: Provide programming assistance, code review, debugging help
2. Code Execution: When users ask to run code, I can execute Python and safe bash commands
3. File Management: Help with file operations and workspace management
4. Indonesian Novel Writing: Creative writing assistance in Bahasa Indonesia
5. Conversation Memory: Remember previous messages in our conversation

Guidelines:
- If user asks in Indonesian, respond in Indonesian
- If user asks in English, respond in English
- For coding questions, provide clear explanations and examples
- For creative writing, be imaginative and engaging
- Always be helpful, friendly, and professional

Current conversation context: This is an ongoing conversation with message history.";

/// Wrap a story idea in the Indonesian novel-writing template.
pub fn story_prompt(idea: &str) -> String {
    format!(
        "Sebagai penulis novel Indonesia yang berpengalaman, {}. \
         Tulis dengan gaya bahasa yang menarik, dialog yang natural, dan deskripsi yang vivid. \
         Buat cerita sepanjang 4-5 paragraf dengan karakter yang kuat dan alur yang menarik. \
         Gunakan Bahasa Indonesia yang baik dan benar.",
        idea.trim()
    )
}

/// Block appended to the user's message after its code ran.
pub fn execution_report(result: &ExecutionResult) -> String {
    format!(
        "\n\nCode Execution Result:\nLanguage: {}\nSuccess: {}\nOutput: {}\nError: {}",
        result.language, result.success, result.output, result.error
    )
}
