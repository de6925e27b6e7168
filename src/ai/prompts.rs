pub const ENGINEER_RUN_INSTRUCTIONS: &str = r#"When providing a prompt, follow these rules EXACTLY:

1. If the user asks to "just do" or similar, create a prompt immediately without asking questions
2. Format your response EXACTLY like this:

PROMPT_COMPLETE
[Your prompt content here]
END_PROMPT

3. The prompt must start with EXACTLY "PROMPT_COMPLETE" followed by a newline
4. The prompt must end with EXACTLY "END_PROMPT" on a new line
5. Do not include ANY text before PROMPT_COMPLETE or after END_PROMPT
6. Do not ask any questions after providing the prompt
7. Do not ask if they want to generate test cases or make modifications"#;

pub const TEST_GENERATION_REQUEST: &str = r#"Create 5 test cases for this prompt. Return ONLY a JSON array with no additional text.

Test Case Format:
{
  "id": "test-1",
  "question": "Test scenario description",
  "difficulty": 5,
  "testingAspect": "What aspect this tests",
  "expectedBehavior": "What the AI should do",
  "actualResponse": ""
}"#;

pub const TEST_GENERATOR_RUN_INSTRUCTIONS: &str = "Generate exactly 5 diverse test cases. Return ONLY a valid JSON array of test cases. \
The response must start with '[' and end with ']'. Do not include any explanatory text.";

pub const EXECUTOR_CONCISENESS: &str =
    "Please provide a response that is 500 tokens or less. Be concise and direct in your answer.";

pub const EXECUTOR_MAX_TOKENS: u32 = 500;

pub const EVALUATION_INSTRUCTIONS: &str = r#"Instructions:
1. Analyze the test results carefully
2. Identify areas where the prompt could be improved
3. Create an improved version of the prompt that:
   - Addresses any failed test cases
   - Improves clarity and specificity
   - Adds missing constraints or requirements
   - Maintains successful aspects

Your response MUST follow this EXACT format (do not use markdown code blocks or any other formatting):

IMPROVED_PROMPT
[Place your improved prompt here exactly as it should be used]
END_PROMPT

[Then provide your explanation of the changes]

IMPORTANT: Do not use any markdown formatting, code blocks, or special characters around the prompt. The markers IMPROVED_PROMPT and END_PROMPT must be on their own lines without any additional formatting."#;

pub const REFINEMENT_FOCUS: &str = r#"Please provide an improved version of the prompt that addresses the issues identified in the test results. Focus on:
1. Areas where the actual responses didn't meet expectations
2. Test cases with low ratings
3. Specific issues mentioned in comments

Return ONLY the improved prompt text with no additional explanation."#;

pub const REFINEMENT_RUN_INSTRUCTIONS: &str =
    "Analyze the test results and provide an improved version of the prompt. Return ONLY the improved prompt text.";
