pub const RESUME_PARSE_SYSTEM: &str = "You are a precise resume parser. \
    You MUST respond with a single valid JSON object and nothing else. \
    Do NOT use markdown code fences. Do NOT invent details that are not in the resume.";

/// `{resume_text}` is replaced with the candidate's resume.
pub const RESUME_PARSE_PROMPT: &str = r#"Extract portfolio website content from the resume below.

Return JSON with exactly this shape (use "" or [] when the resume has no value):
{
  "personal": {
    "name": "", "title": "", "bio": "", "email": "", "phone": "",
    "location": "", "website": "", "profileImage": ""
  },
  "skills": [""],
  "projects": [
    {"title": "", "description": "", "technologies": [""], "githubUrl": "", "liveUrl": "", "imageUrl": ""}
  ],
  "experience": [
    {"title": "", "company": "", "duration": "", "description": ""}
  ],
  "education": [
    {"degree": "", "institution": "", "year": ""}
  ],
  "social": {"github": "", "linkedin": "", "twitter": ""}
}

Rules:
- "title" under personal is the candidate's headline role, e.g. "Backend Engineer".
- "bio" is a 2-3 sentence first-person summary built only from resume facts.
- "duration" keeps the resume's own wording, e.g. "Jun 2022 - Present".
- Social values are full URLs when the resume gives them.

RESUME:
{resume_text}"#;
