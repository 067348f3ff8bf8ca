//! Portfolio code synthesis.
//!
//! Turns `PortfolioTemplateData` plus an installed template into a standalone
//! Vite + React + TypeScript project. Each file comes from a typed generator;
//! the assembled tree is checked (unique paths, required files present, JSON
//! files parse) before anyone packages it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::portfolio::models::PortfolioTemplateData;
use crate::templates::registry::{RegistryError, TemplateRegistryEntry, TemplateRegistryStore};

pub const PACKAGE_JSON: &str = "package.json";
pub const TSCONFIG_JSON: &str = "tsconfig.json";
pub const TSCONFIG_NODE_JSON: &str = "tsconfig.node.json";
pub const DATA_MODULE: &str = "src/data/portfolioData.ts";

/// Marker line in the data module after which the JSON object begins.
pub const DATA_EXPORT_PREFIX: &str = "export const portfolioData: PortfolioData = ";

const REQUIRED_FILES: &[&str] = &[
    PACKAGE_JSON,
    "index.html",
    "src/main.tsx",
    "src/App.tsx",
    DATA_MODULE,
    "src/components/Portfolio.tsx",
    "src/components/ContactForm.tsx",
    "vite.config.ts",
    "tailwind.config.js",
    TSCONFIG_JSON,
];

const JSON_FILES: &[&str] = &[PACKAGE_JSON, TSCONFIG_JSON, TSCONFIG_NODE_JSON];

/// Longest name-derived part of a project slug; keeps archive names bounded.
const MAX_SLUG_NAME_LEN: usize = 48;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("template '{0}' not found")]
    TemplateNotFound(String),

    #[error("failed to serialize portfolio data: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("generated file tree contains '{0}' twice")]
    DuplicatePath(String),

    #[error("generated file tree is missing '{0}'")]
    MissingRequiredFile(&'static str),

    #[error("generated '{path}' is not valid JSON: {reason}")]
    InvalidJson { path: &'static str, reason: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// One generated source file.
#[derive(Debug, Clone)]
pub struct GeneratedFile {
    pub path: &'static str,
    pub content: String,
}

impl GeneratedFile {
    fn new(path: &'static str, content: impl Into<String>) -> Self {
        Self {
            path,
            content: content.into(),
        }
    }
}

/// Relative path → file content, ordered by path.
#[derive(Debug, Clone, Default)]
pub struct FileTree {
    files: BTreeMap<String, String>,
}

impl FileTree {
    pub fn insert(&mut self, file: GeneratedFile) -> Result<(), SynthesisError> {
        if self.files.contains_key(file.path) {
            return Err(SynthesisError::DuplicatePath(file.path.to_string()));
        }
        self.files.insert(file.path.to_string(), file.content);
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Every directory that holds at least one file, e.g. `src`, `src/components`.
    pub fn folders(&self) -> Vec<String> {
        let mut folders = BTreeSet::new();
        for path in self.files.keys() {
            let mut current = path.as_str();
            while let Some((parent, _)) = current.rsplit_once('/') {
                folders.insert(parent.to_string());
                current = parent;
            }
        }
        folders.into_iter().collect()
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.files
    }

    fn validate(&self) -> Result<(), SynthesisError> {
        for &required in REQUIRED_FILES {
            if !self.files.contains_key(required) {
                return Err(SynthesisError::MissingRequiredFile(required));
            }
        }
        for &path in JSON_FILES {
            if let Some(content) = self.files.get(path) {
                serde_json::from_str::<serde_json::Value>(content).map_err(|e| {
                    SynthesisError::InvalidJson {
                        path,
                        reason: e.to_string(),
                    }
                })?;
            }
        }
        Ok(())
    }
}

/// Resolves templates through the registry and builds portfolio projects.
#[derive(Clone)]
pub struct PortfolioSynthesizer {
    registry: Arc<TemplateRegistryStore>,
}

impl PortfolioSynthesizer {
    pub fn new(registry: Arc<TemplateRegistryStore>) -> Self {
        Self { registry }
    }

    /// Looks up an active template by id.
    pub async fn resolve_template(
        &self,
        template_id: &str,
    ) -> Result<TemplateRegistryEntry, SynthesisError> {
        self.registry
            .get_by_id(template_id)
            .await?
            .filter(|t| t.is_active)
            .ok_or_else(|| SynthesisError::TemplateNotFound(template_id.to_string()))
    }

    pub async fn synthesize(
        &self,
        data: &PortfolioTemplateData,
        template_id: &str,
    ) -> Result<(TemplateRegistryEntry, FileTree), SynthesisError> {
        let template = self.resolve_template(template_id).await?;
        let tree = build_file_tree(data, &template)?;
        debug!(
            "Synthesized {} files for template {}",
            tree.len(),
            template.manifest.id
        );
        Ok((template, tree))
    }
}

/// Inputs shared by every generator.
struct SynthesisContext<'a> {
    data: &'a PortfolioTemplateData,
    template: &'a TemplateRegistryEntry,
    project_name: String,
}

/// Builds the full project tree. Pure: no filesystem or registry access.
pub fn build_file_tree(
    data: &PortfolioTemplateData,
    template: &TemplateRegistryEntry,
) -> Result<FileTree, SynthesisError> {
    let ctx = SynthesisContext {
        data,
        template,
        project_name: project_slug(&data.personal.name),
    };

    let mut tree = FileTree::default();
    for file in [
        package_json(&ctx)?,
        index_html(&ctx),
        GeneratedFile::new("src/main.tsx", MAIN_TSX),
        app_tsx(&ctx)?,
        data_module(&ctx)?,
        GeneratedFile::new("src/components/Portfolio.tsx", PORTFOLIO_TSX),
        GeneratedFile::new("src/components/ContactForm.tsx", CONTACT_FORM_TSX),
        GeneratedFile::new("src/index.css", INDEX_CSS),
        GeneratedFile::new("vite.config.ts", VITE_CONFIG),
        GeneratedFile::new("tailwind.config.js", TAILWIND_CONFIG),
        GeneratedFile::new("postcss.config.js", POSTCSS_CONFIG),
        tsconfig_json()?,
        tsconfig_node_json()?,
        readme(&ctx),
        GeneratedFile::new(".gitignore", GITIGNORE),
        GeneratedFile::new(".env.example", ENV_EXAMPLE),
    ] {
        tree.insert(file)?;
    }

    tree.validate()?;
    Ok(tree)
}

/// npm-safe package name derived from the owner's name.
pub fn project_slug(name: &str) -> String {
    let mut slug = String::new();
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let mut slug = slug.trim_end_matches('-');
    if slug.len() > MAX_SLUG_NAME_LEN {
        // ASCII only, so any byte index is a char boundary.
        let cut = &slug[..MAX_SLUG_NAME_LEN];
        slug = match cut.rfind('-') {
            Some(i) if i > 0 => &cut[..i],
            _ => cut,
        };
    }
    if slug.is_empty() {
        "my-portfolio".to_string()
    } else {
        format!("{slug}-portfolio")
    }
}

fn package_json(ctx: &SynthesisContext) -> Result<GeneratedFile, SynthesisError> {
    let description = if ctx.data.personal.name.is_empty() {
        "Personal portfolio".to_string()
    } else {
        format!("Portfolio of {}", ctx.data.personal.name)
    };
    let manifest = json!({
        "name": ctx.project_name,
        "private": true,
        "version": "1.0.0",
        "type": "module",
        "description": description,
        "scripts": {
            "dev": "vite",
            "build": "tsc && vite build",
            "preview": "vite preview"
        },
        "dependencies": {
            "@emailjs/browser": "^4.3.3",
            "framer-motion": "^11.0.0",
            "react": "^18.2.0",
            "react-dom": "^18.2.0"
        },
        "devDependencies": {
            "@types/react": "^18.2.43",
            "@types/react-dom": "^18.2.17",
            "@vitejs/plugin-react": "^4.2.1",
            "autoprefixer": "^10.4.16",
            "postcss": "^8.4.32",
            "tailwindcss": "^3.4.0",
            "typescript": "^5.2.2",
            "vite": "^5.0.8"
        },
        "portfolioTemplate": {
            "id": ctx.template.manifest.id,
            "version": ctx.template.manifest.version
        }
    });
    Ok(GeneratedFile::new(
        PACKAGE_JSON,
        serde_json::to_string_pretty(&manifest)? + "\n",
    ))
}

fn index_html(ctx: &SynthesisContext) -> GeneratedFile {
    let title = match (
        ctx.data.personal.name.as_str(),
        ctx.data.personal.title.as_str(),
    ) {
        ("", _) => "Portfolio".to_string(),
        (name, "") => name.to_string(),
        (name, role) => format!("{name} | {role}"),
    };
    let description = if ctx.data.personal.bio.is_empty() {
        title.clone()
    } else {
        ctx.data.personal.bio.clone()
    };
    GeneratedFile::new(
        "index.html",
        format!(
            r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <meta name="description" content="{description}" />
    <title>{title}</title>
  </head>
  <body>
    <div id="root"></div>
    <script type="module" src="/src/main.tsx"></script>
  </body>
</html>
"#,
            description = escape_html(&description),
            title = escape_html(&title),
        ),
    )
}

fn app_tsx(ctx: &SynthesisContext) -> Result<GeneratedFile, SynthesisError> {
    let template_id = serde_json::to_string(&ctx.template.manifest.id)?;
    Ok(GeneratedFile::new(
        "src/App.tsx",
        format!(
            r#"import Portfolio from './components/Portfolio';
import portfolioData from './data/portfolioData';

export const TEMPLATE_ID = {template_id};

export default function App() {{
  return <Portfolio data={{portfolioData}} />;
}}
"#
        ),
    ))
}

fn data_module(ctx: &SynthesisContext) -> Result<GeneratedFile, SynthesisError> {
    let data = serde_json::to_string_pretty(ctx.data)?;
    let template_info = serde_json::to_string_pretty(&json!({
        "id": ctx.template.manifest.id,
        "name": ctx.template.manifest.name,
        "version": ctx.template.manifest.version,
        "category": ctx.template.manifest.category,
    }))?;
    Ok(GeneratedFile::new(
        DATA_MODULE,
        format!("{DATA_TYPES}\nexport const templateInfo = {template_info} as const;\n\n{DATA_EXPORT_PREFIX}{data};\n\nexport default portfolioData;\n"),
    ))
}

fn tsconfig_json() -> Result<GeneratedFile, SynthesisError> {
    let config = json!({
        "compilerOptions": {
            "target": "ES2020",
            "useDefineForClassFields": true,
            "lib": ["ES2020", "DOM", "DOM.Iterable"],
            "module": "ESNext",
            "skipLibCheck": true,
            "moduleResolution": "bundler",
            "allowImportingTsExtensions": true,
            "resolveJsonModule": true,
            "isolatedModules": true,
            "noEmit": true,
            "jsx": "react-jsx",
            "strict": true,
            "noUnusedLocals": true,
            "noUnusedParameters": true,
            "noFallthroughCasesInSwitch": true
        },
        "include": ["src"],
        "references": [{ "path": "./tsconfig.node.json" }]
    });
    Ok(GeneratedFile::new(
        TSCONFIG_JSON,
        serde_json::to_string_pretty(&config)? + "\n",
    ))
}

fn tsconfig_node_json() -> Result<GeneratedFile, SynthesisError> {
    let config = json!({
        "compilerOptions": {
            "composite": true,
            "skipLibCheck": true,
            "module": "ESNext",
            "moduleResolution": "bundler",
            "allowSyntheticDefaultImports": true
        },
        "include": ["vite.config.ts"]
    });
    Ok(GeneratedFile::new(
        TSCONFIG_NODE_JSON,
        serde_json::to_string_pretty(&config)? + "\n",
    ))
}

fn readme(ctx: &SynthesisContext) -> GeneratedFile {
    let manifest = &ctx.template.manifest;
    let owner = if ctx.data.personal.name.is_empty() {
        "My Portfolio".to_string()
    } else {
        format!("{}'s Portfolio", ctx.data.personal.name)
    };
    let mut readme = format!(
        "# {owner}\n\nGenerated from the **{}** template (v{}, {}).\n",
        manifest.name, manifest.version, manifest.category
    );
    if !manifest.description.is_empty() {
        readme.push_str(&format!("\n{}\n", manifest.description));
    }
    if !manifest.features.is_empty() {
        readme.push_str("\n## Template features\n\n");
        for feature in &manifest.features {
            readme.push_str(&format!("- {feature}\n"));
        }
    }
    readme.push_str(
        "\n## Getting started\n\n```bash\nnpm install\ncp .env.example .env   # add your EmailJS keys\nnpm run dev\n```\n\n\
         Edit `src/data/portfolioData.ts` to update your content.\n",
    );
    GeneratedFile::new("README.md", readme)
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

const DATA_TYPES: &str = r#"export interface PersonalInfo {
  name: string;
  title: string;
  bio: string;
  email: string;
  phone: string;
  location: string;
  website: string;
  profileImage: string;
}

export interface Project {
  title: string;
  description: string;
  technologies: string[];
  githubUrl: string;
  liveUrl: string;
  imageUrl: string;
}

export interface Experience {
  title: string;
  company: string;
  duration: string;
  description: string;
}

export interface Education {
  degree: string;
  institution: string;
  year: string;
}

export interface SocialLinks {
  github: string;
  linkedin: string;
  twitter: string;
}

export interface PortfolioData {
  personal: PersonalInfo;
  skills: string[];
  projects: Project[];
  experience: Experience[];
  education: Education[];
  social: SocialLinks;
}
"#;

const MAIN_TSX: &str = r#"import React from 'react';
import ReactDOM from 'react-dom/client';
import App from './App';
import './index.css';

ReactDOM.createRoot(document.getElementById('root')!).render(
  <React.StrictMode>
    <App />
  </React.StrictMode>,
);
"#;

const PORTFOLIO_TSX: &str = r#"import { motion } from 'framer-motion';
import type { PortfolioData } from '../data/portfolioData';
import ContactForm from './ContactForm';

interface PortfolioProps {
  data: PortfolioData;
}

const fadeIn = {
  hidden: { opacity: 0, y: 24 },
  visible: { opacity: 1, y: 0, transition: { duration: 0.5 } },
};

export default function Portfolio({ data }: PortfolioProps) {
  const { personal, skills, projects, experience, education, social } = data;

  return (
    <main className="min-h-screen bg-slate-950 text-slate-100">
      <motion.header
        className="mx-auto flex max-w-4xl flex-col items-center gap-4 px-6 py-20 text-center"
        initial="hidden"
        animate="visible"
        variants={fadeIn}
      >
        {personal.profileImage && (
          <img
            src={personal.profileImage}
            alt={personal.name}
            className="h-32 w-32 rounded-full object-cover"
          />
        )}
        <h1 className="text-4xl font-bold">{personal.name}</h1>
        <p className="text-xl text-indigo-300">{personal.title}</p>
        <p className="max-w-2xl text-slate-300">{personal.bio}</p>
        <div className="flex gap-4 text-sm text-slate-400">
          {personal.location && <span>{personal.location}</span>}
          {personal.website && <a href={personal.website}>{personal.website}</a>}
        </div>
      </motion.header>

      {skills.length > 0 && (
        <motion.section className="mx-auto max-w-4xl px-6 py-12" initial="hidden" whileInView="visible" variants={fadeIn}>
          <h2 className="mb-6 text-2xl font-semibold">Skills</h2>
          <ul className="flex flex-wrap gap-2">
            {skills.map((skill) => (
              <li key={skill} className="rounded-full bg-slate-800 px-3 py-1 text-sm">
                {skill}
              </li>
            ))}
          </ul>
        </motion.section>
      )}

      {projects.length > 0 && (
        <motion.section className="mx-auto max-w-4xl px-6 py-12" initial="hidden" whileInView="visible" variants={fadeIn}>
          <h2 className="mb-6 text-2xl font-semibold">Projects</h2>
          <div className="grid gap-6 md:grid-cols-2">
            {projects.map((project) => (
              <article key={project.title} className="rounded-xl bg-slate-900 p-6">
                {project.imageUrl && (
                  <img src={project.imageUrl} alt={project.title} className="mb-4 rounded-lg" />
                )}
                <h3 className="text-lg font-semibold">{project.title}</h3>
                <p className="mt-2 text-slate-300">{project.description}</p>
                <p className="mt-3 text-sm text-indigo-300">{project.technologies.join(' · ')}</p>
                <div className="mt-4 flex gap-4 text-sm">
                  {project.githubUrl && <a href={project.githubUrl}>Code</a>}
                  {project.liveUrl && <a href={project.liveUrl}>Live</a>}
                </div>
              </article>
            ))}
          </div>
        </motion.section>
      )}

      {experience.length > 0 && (
        <motion.section className="mx-auto max-w-4xl px-6 py-12" initial="hidden" whileInView="visible" variants={fadeIn}>
          <h2 className="mb-6 text-2xl font-semibold">Experience</h2>
          {experience.map((job) => (
            <div key={`${job.company}-${job.title}`} className="mb-6">
              <h3 className="font-semibold">
                {job.title} · {job.company}
              </h3>
              <p className="text-sm text-slate-400">{job.duration}</p>
              <p className="mt-2 text-slate-300">{job.description}</p>
            </div>
          ))}
        </motion.section>
      )}

      {education.length > 0 && (
        <motion.section className="mx-auto max-w-4xl px-6 py-12" initial="hidden" whileInView="visible" variants={fadeIn}>
          <h2 className="mb-6 text-2xl font-semibold">Education</h2>
          {education.map((school) => (
            <div key={`${school.institution}-${school.degree}`} className="mb-4">
              <h3 className="font-semibold">{school.degree}</h3>
              <p className="text-slate-400">
                {school.institution} {school.year && `· ${school.year}`}
              </p>
            </div>
          ))}
        </motion.section>
      )}

      <section className="mx-auto max-w-4xl px-6 py-12">
        <h2 className="mb-6 text-2xl font-semibold">Contact</h2>
        <ContactForm recipientEmail={personal.email} />
        <div className="mt-8 flex gap-6 text-sm text-slate-400">
          {social.github && <a href={social.github}>GitHub</a>}
          {social.linkedin && <a href={social.linkedin}>LinkedIn</a>}
          {social.twitter && <a href={social.twitter}>Twitter</a>}
        </div>
      </section>
    </main>
  );
}
"#;

const CONTACT_FORM_TSX: &str = r#"import { FormEvent, useRef, useState } from 'react';
import emailjs from '@emailjs/browser';

interface ContactFormProps {
  recipientEmail: string;
}

type Status = 'idle' | 'sending' | 'sent' | 'error';

export default function ContactForm({ recipientEmail }: ContactFormProps) {
  const form = useRef<HTMLFormElement>(null);
  const [status, setStatus] = useState<Status>('idle');

  const onSubmit = async (event: FormEvent) => {
    event.preventDefault();
    if (!form.current) return;
    setStatus('sending');
    try {
      await emailjs.sendForm(
        import.meta.env.VITE_EMAILJS_SERVICE_ID,
        import.meta.env.VITE_EMAILJS_TEMPLATE_ID,
        form.current,
        { publicKey: import.meta.env.VITE_EMAILJS_PUBLIC_KEY },
      );
      setStatus('sent');
      form.current.reset();
    } catch {
      setStatus('error');
    }
  };

  return (
    <form ref={form} onSubmit={onSubmit} className="flex flex-col gap-4">
      <input type="hidden" name="to_email" value={recipientEmail} />
      <input name="from_name" required placeholder="Your name" className="rounded bg-slate-900 p-3" />
      <input name="reply_to" type="email" required placeholder="Your email" className="rounded bg-slate-900 p-3" />
      <textarea name="message" required rows={5} placeholder="Message" className="rounded bg-slate-900 p-3" />
      <button type="submit" disabled={status === 'sending'} className="rounded bg-indigo-500 p-3 font-semibold">
        {status === 'sending' ? 'Sending…' : 'Send message'}
      </button>
      {status === 'sent' && <p className="text-green-400">Thanks! Your message was sent.</p>}
      {status === 'error' && <p className="text-red-400">Something went wrong. Please try again.</p>}
    </form>
  );
}
"#;

const INDEX_CSS: &str = "@tailwind base;\n@tailwind components;\n@tailwind utilities;\n\nhtml {\n  scroll-behavior: smooth;\n}\n";

const VITE_CONFIG: &str = r#"import { defineConfig } from 'vite';
import react from '@vitejs/plugin-react';

export default defineConfig({
  plugins: [react()],
});
"#;

const TAILWIND_CONFIG: &str = r#"/** @type {import('tailwindcss').Config} */
export default {
  content: ['./index.html', './src/**/*.{js,ts,jsx,tsx}'],
  theme: {
    extend: {},
  },
  plugins: [],
};
"#;

const POSTCSS_CONFIG: &str = r#"export default {
  plugins: {
    tailwindcss: {},
    autoprefixer: {},
  },
};
"#;

const GITIGNORE: &str = "node_modules\ndist\n.env\n*.log\n";

const ENV_EXAMPLE: &str =
    "VITE_EMAILJS_SERVICE_ID=\nVITE_EMAILJS_TEMPLATE_ID=\nVITE_EMAILJS_PUBLIC_KEY=\n";
