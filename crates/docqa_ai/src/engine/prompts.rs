/// Note appended to the conversation context when a question looks like a follow-up.
pub fn follow_up_note(previous_question: &str) -> String {
    format!("\nNote: This appears to be a follow-up question to: {previous_question}")
}

pub fn answer_prompt(conversation_context: &str, question: &str, document_context: &str) -> String {
    // The model must answer in HTML; markdown that slips through is converted afterwards.
    format!(
        r#"
You are a knowledgeable assistant with access to document context and conversation history. Answer questions based on the provided context and keep the conversation flowing.

{conversation_context}

Current Question: {question}

Document Context:
{document_context}

CONVERSATION GUIDELINES:
- If this looks like a follow-up question, refer back to the previous conversation naturally
- Phrases like "As we discussed..." or "Building on your previous question..." are welcome when relevant
- If no document context matches, say so clearly while keeping a conversational tone

FORMATTING INSTRUCTIONS:
- Give a direct, conversational answer
- Be precise and to the point
- Use simple bullet points only when asked or when listing items
- Lead with the information that answers the question

FORMATTING RULES:
- You MUST output HTML, NOT markdown
- Bold text: <strong>word</strong>, never **word** or *word*
- Italic text: <em>word</em>, never *word* or _word_
- Do not use asterisks (*) or underscores (_) for formatting

Answer:"#
    )
}
